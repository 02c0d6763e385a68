use image::RgbImage;
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{Result, SegError};

/// Per-channel mean/std normalization applied after scaling to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet statistics, which segmentation backbones are usually trained with.
    pub const IMAGENET: Self = Self {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    pub fn new(mean: &[f32], std: &[f32]) -> Result<Self> {
        let mean: [f32; 3] = mean.try_into().map_err(|_| {
            SegError::validation("mean", format!("expected 3 values, got {}", mean.len()))
        })?;
        let std: [f32; 3] = std.try_into().map_err(|_| {
            SegError::validation("std", format!("expected 3 values, got {}", std.len()))
        })?;
        if std.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(SegError::validation(
                "std",
                format!("values must be positive, got {std:?}"),
            ));
        }
        Ok(Self { mean, std })
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IMAGENET
    }
}

/// Converts an RGB image to a normalized `[1, 3, height, width]` tensor.
pub fn to_tensor(image: &RgbImage, normalization: &Normalization) -> Array4<f32> {
    let mut tensor = image.as_ndarray3().mapv(|v| f32::from(v) / 255.0);
    for (channel, mut plane) in tensor.outer_iter_mut().enumerate() {
        let (mean, std) = (normalization.mean[channel], normalization.std[channel]);
        plane.mapv_inplace(|v| (v - mean) / std);
    }
    tensor.insert_axis(Axis(0))
}
