use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::prelude::*;

use crate::errors::{Result, SegError};

/// Cityscapes train-id colors, indexed by class.
pub const CITYSCAPES_PALETTE: [[u8; 3]; 19] = [
    [128, 64, 128],  // road
    [244, 35, 232],  // sidewalk
    [70, 70, 70],    // building
    [102, 102, 156], // wall
    [190, 153, 153], // fence
    [153, 153, 153], // pole
    [250, 170, 30],  // traffic light
    [220, 220, 0],   // traffic sign
    [107, 142, 35],  // vegetation
    [152, 251, 152], // terrain
    [70, 130, 180],  // sky
    [220, 20, 60],   // person
    [255, 0, 0],     // rider
    [0, 0, 142],     // car
    [0, 0, 70],      // truck
    [0, 60, 100],    // bus
    [0, 80, 100],    // train
    [0, 0, 230],     // motorcycle
    [119, 11, 32],   // bicycle
];

/// Maps a `[height, width]` label map to palette colors. Labels without a
/// palette entry are drawn black.
pub fn colorize(labels: ArrayView2<usize>) -> RgbImage {
    let (height, width) = labels.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let label = labels[[y as usize, x as usize]];
        Rgb(CITYSCAPES_PALETTE.get(label).copied().unwrap_or([0, 0, 0]))
    })
}

/// Stores raw class ids as an 8-bit grayscale image.
pub fn label_image(labels: ArrayView2<usize>) -> Result<GrayImage> {
    if let Some(&label) = labels.iter().find(|&&label| label > u8::MAX as usize) {
        return Err(SegError::validation(
            "labels",
            format!("class id {label} does not fit in an 8-bit label image"),
        ));
    }
    let (height, width) = labels.dim();
    Ok(GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([labels[[y as usize, x as usize]] as u8])
    }))
}

/// Reads an 8-bit label image back into a `[height, width]` label map.
pub fn labels_from_image(mask: &GrayImage) -> Array2<usize> {
    let (width, height) = mask.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        mask.get_pixel(x as u32, y as u32).0[0] as usize
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_uses_palette() {
        let labels = array![[0usize, 10], [13, 42]];
        let image = colorize(labels.view());

        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0), &Rgb([128, 64, 128]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([70, 130, 180]));
        assert_eq!(image.get_pixel(0, 1), &Rgb([0, 0, 142]));
        assert_eq!(image.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_image_round_trip() -> Result<()> {
        let labels = array![[0usize, 1, 2], [18, 255, 7]];
        let image = label_image(labels.view())?;

        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(labels_from_image(&image), labels);
        Ok(())
    }

    #[test]
    fn test_label_image_rejects_wide_ids() {
        let labels = array![[256usize]];
        assert!(label_image(labels.view()).is_err());
    }
}
