pub mod colorize;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod reduce;
pub mod tiling;
pub mod traits;

pub mod mocks;

use image::{DynamicImage, ImageFormat, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::prelude::*;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use config::Config;
pub use engine::{Prediction, Schedule, ScoreAccumulator, SlidingWindow, TiledInference};
pub use errors::{Result, SegError};
pub use metrics::{ConfusionMatrix, EvaluationSummary};
pub use model::Model;
pub use preprocess::Normalization;
pub use tiling::{TileGrid, TileRect};
pub use traits::*;

/// ディレクトリツリー内の全画像にタイル推論を実行する
pub struct Segmenter<M: CropScorer> {
    model: M,
    engine: TiledInference,
    normalization: Normalization,
    config: Config,
}

impl<M: CropScorer> Segmenter<M> {
    pub fn new(model: M, config: Config) -> Result<Self> {
        let engine = config.inference(model.crop_size())?;
        let normalization = config.normalization()?;
        Ok(Self {
            model,
            engine,
            normalization,
            config,
        })
    }

    /// `input_dir` 以下の対応画像を全てセグメンテーション
    ///
    /// `masks_dir` が設定され、ラベル付きピクセルが1つ以上あれば評価結果を返す。
    /// 混同行列は呼び出しごとに空から集計する。
    pub fn process_directory(&self) -> Result<Option<EvaluationSummary>> {
        let input_path = &self.config.input_dir;
        let output_path = &self.config.output_dir;

        if !input_path.exists() {
            return Err(SegError::FileSystem {
                path: input_path.clone(),
                operation: "ディレクトリ存在確認".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "入力ディレクトリが存在しません",
                ),
            });
        }

        fs::create_dir_all(output_path).map_err(|e| SegError::FileSystem {
            path: output_path.clone(),
            operation: "ディレクトリ作成".to_string(),
            source: e,
        })?;

        let image_files = self.collect_image_files(input_path);

        if image_files.is_empty() {
            info!(input = %input_path.display(), "処理対象の画像ファイルが見つかりません");
            return Ok(None);
        }

        let window = self.engine.window();
        info!(
            images = image_files.len(),
            crop = ?window.crop_size(),
            num_classes = window.num_classes(),
            stride_rate = window.stride_rate(),
            "画像処理を開始"
        );

        let pb = ProgressBar::new(image_files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| SegError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
        );

        let confusion = Mutex::new(ConfusionMatrix::new(window.num_classes()));
        image_files
            .par_iter()
            .try_for_each(|input_file| -> Result<()> {
                self.process_single_image(input_file, output_path, &confusion)?;
                pb.inc(1);
                Ok(())
            })?;

        pb.finish_with_message("処理完了");

        let summary = confusion.into_inner().summary();
        if let Some(summary) = summary {
            info!(
                acc = summary.pixel_accuracy,
                acc_cls = summary.mean_class_accuracy,
                mean_iou = summary.mean_iou,
                "評価完了"
            );
        }
        Ok(summary)
    }

    fn collect_image_files(&self, input_path: &Path) -> Vec<PathBuf> {
        WalkDir::new(input_path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "読み込めないエントリをスキップ");
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && self.is_supported_image_format(e.path()))
            .map(|e| e.into_path())
            .collect()
    }

    pub fn is_supported_image_format(&self, path: &Path) -> bool {
        ImageFormat::from_path(path).is_ok_and(|format| format.reading_enabled())
    }

    fn process_single_image(
        &self,
        input_file: &Path,
        output_dir: &Path,
        confusion: &Mutex<ConfusionMatrix>,
    ) -> Result<()> {
        let img = image::open(input_file).map_err(|e| SegError::ImageProcessing {
            path: input_file.display().to_string(),
            operation: "画像読み込み".to_string(),
            source: Box::new(e),
        })?;

        let labels = self
            .segment_image(&img.to_rgb8())
            .map_err(|e| SegError::ImageProcessing {
                path: input_file.display().to_string(),
                operation: "タイル推論".to_string(),
                source: Box::new(e),
            })?;

        let relative_path = self.get_relative_path(input_file)?;

        if let Some(masks_dir) = &self.config.masks_dir {
            let mask_path = masks_dir.join(&relative_path).with_extension("png");
            self.evaluate(&labels, &mask_path, confusion)?;
        }

        let output_file = output_dir
            .join(&relative_path)
            .with_extension(&self.config.format);

        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| SegError::FileSystem {
                path: parent.to_path_buf(),
                operation: "出力ディレクトリ作成".to_string(),
                source: e,
            })?;
        }

        let output = if self.config.raw_labels {
            DynamicImage::ImageLuma8(colorize::label_image(labels.view())?)
        } else {
            DynamicImage::ImageRgb8(colorize::colorize(labels.view()))
        };

        output
            .save_with_format(&output_file, self.config.output_format())
            .map_err(|e| SegError::ImageProcessing {
                path: output_file.display().to_string(),
                operation: "ラベルマップ保存".to_string(),
                source: Box::new(e),
            })?;

        debug!(input = %input_file.display(), output = %output_file.display(), "画像処理完了");
        Ok(())
    }

    /// RGB画像1枚をタイル推論し、`[height, width]` のラベルマップを返す
    pub fn segment_image(&self, img: &RgbImage) -> Result<Array2<usize>> {
        let tensor = preprocess::to_tensor(img, &self.normalization);
        let prediction = self.engine.infer(&self.model, tensor.view())?;
        Ok(prediction.labels.index_axis_move(Axis(0), 0))
    }

    fn evaluate(
        &self,
        labels: &Array2<usize>,
        mask_path: &Path,
        confusion: &Mutex<ConfusionMatrix>,
    ) -> Result<()> {
        let mask = image::open(mask_path)
            .map_err(|e| SegError::ImageProcessing {
                path: mask_path.display().to_string(),
                operation: "正解マスク読み込み".to_string(),
                source: Box::new(e),
            })?
            .into_luma8();
        let target = colorize::labels_from_image(&mask);

        let mut image_matrix = ConfusionMatrix::new(self.engine.window().num_classes());
        image_matrix.update(labels.view(), target.view())?;
        confusion.lock().merge(&image_matrix);
        Ok(())
    }

    pub fn get_relative_path(&self, input_file: &Path) -> Result<PathBuf> {
        let input_dir = &self.config.input_dir;
        input_file
            .strip_prefix(input_dir)
            .map(|p| p.to_path_buf())
            .map_err(|_| SegError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "相対パス取得".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "入力ファイルが入力ディレクトリ内にありません",
                ),
            })
    }
}

impl Segmenter<Model> {
    /// 設定で指定されたONNXモデルを読み込んで構築
    pub fn with_onnx_model(config: Config) -> Result<Self> {
        let model = Model::new(&config.model_path, config.device_id)?;
        Self::new(model, config)
    }
}
