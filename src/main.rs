use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slide_seg_rs::{Config, Segmenter};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    ensure!(config.model_path.exists(), "Model path does not exist");
    ensure!(config.input_dir.exists(), "Input directory does not exist");
    if let Some(masks_dir) = &config.masks_dir {
        ensure!(masks_dir.exists(), "Masks directory does not exist");
    }

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let segmenter = Segmenter::with_onnx_model(config)
        .context("Failed to set up the segmentation model")?;

    match segmenter.process_directory()? {
        Some(summary) => println!(
            "[acc {:.5}], [acc_cls {:.5}], [mean_iou {:.5}]",
            summary.pixel_accuracy, summary.mean_class_accuracy, summary.mean_iou
        ),
        None => info!("All images processed"),
    }

    Ok(())
}
