use clap::Parser;
use image::ImageFormat;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::engine::{Schedule, SlidingWindow, TiledInference};
use crate::errors::{Result, SegError};
use crate::preprocess::Normalization;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    pub input_dir: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Crop height; taken from the model input shape when omitted.
    #[arg(long)]
    pub crop_height: Option<usize>,

    /// Crop width; taken from the model input shape when omitted.
    #[arg(long)]
    pub crop_width: Option<usize>,

    #[arg(short = 'c', long, default_value_t = 19)]
    pub num_classes: usize,

    /// Tile stride as a fraction of the crop size, in (0, 1].
    #[arg(short, long, default_value_t = 0.5, value_parser = check_stride_rate)]
    pub stride_rate: f64,

    /// Score tiles of one image concurrently.
    #[arg(long)]
    pub parallel_tiles: bool,

    /// Abort an image whose tiled inference runs longer than this.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Directory of ground-truth label images mirroring `input_dir`.
    #[arg(long)]
    pub masks_dir: Option<PathBuf>,

    #[arg(long, value_delimiter = ',', default_values_t = Normalization::IMAGENET.mean)]
    pub mean: Vec<f32>,

    #[arg(long, value_delimiter = ',', default_values_t = Normalization::IMAGENET.std)]
    pub std: Vec<f32>,

    /// Write class ids as grayscale instead of palette colors.
    #[arg(long)]
    pub raw_labels: bool,

    #[arg(short = 'j', long, default_value_t = default_num_threads())]
    pub num_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    /// ウィンドウ設定を構築（未指定のクロップサイズはモデルの固定入力サイズを使う）
    pub fn sliding_window(&self, model_crop: Option<(usize, usize)>) -> Result<SlidingWindow> {
        let crop_height = self
            .crop_height
            .or(model_crop.map(|(height, _)| height))
            .ok_or_else(|| SegError::Configuration {
                message: "crop height not given and the model input height is dynamic"
                    .to_string(),
            })?;
        let crop_width = self
            .crop_width
            .or(model_crop.map(|(_, width)| width))
            .ok_or_else(|| SegError::Configuration {
                message: "crop width not given and the model input width is dynamic".to_string(),
            })?;

        SlidingWindow::new((crop_height, crop_width), self.num_classes, self.stride_rate)
    }

    pub fn inference(&self, model_crop: Option<(usize, usize)>) -> Result<TiledInference> {
        let engine = TiledInference::new(self.sliding_window(model_crop)?).with_schedule(
            if self.parallel_tiles {
                Schedule::Parallel
            } else {
                Schedule::Sequential
            },
        );
        Ok(match self.deadline_secs {
            Some(secs) => engine.with_deadline(Duration::from_secs(secs)),
            None => engine,
        })
    }

    pub fn normalization(&self) -> Result<Normalization> {
        Normalization::new(&self.mean, &self.std)
    }

    pub fn output_format(&self) -> ImageFormat {
        ImageFormat::from_extension(&self.format).unwrap_or(ImageFormat::Png)
    }
}

fn default_num_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

fn check_stride_rate(s: &str) -> std::result::Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{s} is not a number: {e}"))?;
    if rate > 0.0 && rate <= 1.0 {
        Ok(rate)
    } else {
        Err(format!("stride rate must be in (0, 1], got {rate}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec!["slide-seg", "in", "-m", "model.onnx"];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.format, "png");
        assert_eq!(config.num_classes, 19);
        assert_eq!(config.stride_rate, 0.5);
        assert_eq!(config.normalization().unwrap(), Normalization::IMAGENET);
        assert!(!config.parallel_tiles);
    }

    #[test]
    fn test_normalization_list_arguments() {
        let config = parse(&["--mean", "0.5,0.5,0.5", "--std", "0.25,0.25,0.25"]);
        let normalization = config.normalization().unwrap();
        assert_eq!(normalization.mean, [0.5; 3]);
        assert_eq!(normalization.std, [0.25; 3]);
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        for extra in [
            ["--stride-rate", "0"],
            ["--stride-rate", "1.5"],
            ["--format", "nope"],
        ] {
            let mut args = vec!["slide-seg", "in", "-m", "model.onnx"];
            args.extend_from_slice(&extra);
            assert!(Config::try_parse_from(args).is_err(), "{extra:?}");
        }
    }

    #[test]
    fn test_crop_falls_back_to_model() -> Result<()> {
        let config = parse(&["--crop-width", "300"]);
        let window = config.sliding_window(Some((512, 1024)))?;
        assert_eq!(window.crop_size(), (512, 300));

        assert!(matches!(
            config.sliding_window(None),
            Err(SegError::Configuration { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_inference_engine_settings() -> Result<()> {
        let config = parse(&["--crop-height", "8", "--crop-width", "8", "-c", "3"]);
        let engine = config.inference(None)?;
        assert_eq!(engine.window().num_classes(), 3);
        assert_eq!(engine.window().strides()?, (4, 4));
        Ok(())
    }
}
