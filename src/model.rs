use std::path::Path;

use crate::{
    errors::{Result, SegError},
    traits::{CropScorer, ScoreOutput},
};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::debug;

/// クロップ単位で推論するONNXセグメンテーションモデル
///
/// セッションは再入不可のため、Mutexで呼び出しを直列化する
pub struct Model {
    input_name: String,
    output_name: String,
    crop_size: Option<(usize, usize)>,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| SegError::Model {
                operation: "セッションビルダー初期化".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| SegError::Model {
                operation: "実行プロバイダー設定".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| SegError::Model {
                operation: "メモリパターン設定".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| SegError::Model {
                operation: format!("モデルファイル読み込み: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let input = session.inputs.first().ok_or_else(|| SegError::Model {
            operation: "モデル入力取得".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "モデルに入力がありません",
            )),
        })?;
        let input_name = input.name.clone();
        // 補助ヘッドは主出力の後に並ぶため推論では使わない
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| SegError::Model {
                operation: "モデル出力取得".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "モデルに出力がありません",
                )),
            })?;
        let crop_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| static_crop_size(&shape[..]));

        debug!(input = %input_name, output = %output_name, ?crop_size, "Loaded model");

        Ok(Self {
            input_name,
            output_name,
            crop_size,
            session: Mutex::new(session),
        })
    }
}

/// NCHW入力形状の高さと幅（両方が固定の場合のみ）
fn static_crop_size(dims: &[i64]) -> Option<(usize, usize)> {
    match dims {
        [_, _, height, width] if *height > 0 && *width > 0 => {
            Some((*height as usize, *width as usize))
        }
        _ => None,
    }
}

impl CropScorer for Model {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&crop.as_standard_layout())?
        ])?;
        let scores = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        Ok(ScoreOutput::Single(scores))
    }

    fn crop_size(&self) -> Option<(usize, usize)> {
        self.crop_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_crop_size() {
        assert_eq!(static_crop_size(&[1, 3, 512, 1024]), Some((512, 1024)));
        assert_eq!(static_crop_size(&[-1, 3, 769, 769]), Some((769, 769)));
        assert_eq!(static_crop_size(&[1, 3, -1, -1]), None);
        assert_eq!(static_crop_size(&[1, 3, 512]), None);
    }

    #[test]
    fn test_missing_model_file_is_model_error() {
        let result = Model::new(Path::new("does/not/exist.onnx"), 0);
        assert!(matches!(result, Err(SegError::Model { .. })));
    }
}
