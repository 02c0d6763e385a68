use crate::errors::{Result, SegError};
use ndarray::prelude::*;

/// スコアラーが返すクロップ単位のクラススコア
///
/// 補助ヘッドを持つネットワークは複数のテンソルを返すが、タイル推論では先頭のみ使う
#[derive(Debug, Clone)]
pub enum ScoreOutput {
    Single(Array4<f32>),
    Composite(Vec<Array4<f32>>),
}

impl ScoreOutput {
    /// 主出力の `[batch, num_classes, crop_h, crop_w]` テンソル
    pub fn into_primary(self) -> Result<Array4<f32>> {
        match self {
            Self::Single(scores) => Ok(scores),
            Self::Composite(outputs) => outputs.into_iter().next().ok_or_else(|| {
                SegError::validation("scores", "composite scorer output contains no tensors")
            }),
        }
    }
}

impl From<Array4<f32>> for ScoreOutput {
    fn from(scores: Array4<f32>) -> Self {
        Self::Single(scores)
    }
}

/// 固定サイズのクロップを推論するモデルの抽象化
///
/// タイル推論エンジンはこのトレイト経由でのみモデルを呼び出す。
/// 実装は推論モードで動作し、後続の結果を変える状態を呼び出し間で保持してはならない
pub trait CropScorer: Send + Sync {
    /// `[batch, channels, crop_h, crop_w]` のクロップから
    /// `[batch, num_classes, crop_h, crop_w]` のスコアを計算
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput>;

    /// モデルの固定入力サイズ（可変なら `None`）
    fn crop_size(&self) -> Option<(usize, usize)> {
        None
    }
}

impl<S: CropScorer + ?Sized> CropScorer for &S {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        (**self).score(crop)
    }

    fn crop_size(&self) -> Option<(usize, usize)> {
        (**self).crop_size()
    }
}
