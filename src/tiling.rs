//! Sliding-window tile layout.
//!
//! A grid is built independently per axis: every axis gets a list of
//! crop-sized spans starting at multiples of the stride, and the last span is
//! pulled back so it ends exactly on the image border. Tiles are the cartesian
//! product of the row spans and the column spans, visited in row-major order.

use std::ops::Range;

use crate::errors::{Result, SegError};

/// Stride in pixels for a crop extent and an overlap rate in `(0, 1]`.
pub fn stride_from_rate(extent: usize, stride_rate: f64) -> Result<usize> {
    if !(stride_rate > 0.0 && stride_rate <= 1.0) {
        return Err(SegError::validation(
            "stride_rate",
            format!("must be in (0, 1], got {stride_rate}"),
        ));
    }
    let stride = (extent as f64 * stride_rate).ceil() as usize;
    if stride == 0 {
        return Err(SegError::validation(
            "stride",
            format!("must be at least 1 (extent {extent}, rate {stride_rate})"),
        ));
    }
    Ok(stride)
}

/// Number of tiles along one axis: `ceil((length - extent) / stride) + 1`.
pub fn tile_count(length: usize, extent: usize, stride: usize) -> Result<usize> {
    if extent == 0 {
        return Err(SegError::validation("crop extent", "must be positive"));
    }
    if stride == 0 {
        return Err(SegError::validation("stride", "must be at least 1"));
    }
    // A stride longer than the crop would skip pixels between tiles.
    if stride > extent {
        return Err(SegError::validation(
            "stride",
            format!("{stride} exceeds crop extent {extent}"),
        ));
    }
    if length < extent {
        return Err(SegError::validation(
            "crop extent",
            format!("{extent} exceeds axis length {length}"),
        ));
    }
    Ok((length - extent).div_ceil(stride) + 1)
}

/// Moves a nominal tile start back so the tile fits inside `[0, length)`.
///
/// Only the last tile of an axis can overshoot, and for it this yields
/// `length - extent`. Callers guarantee `extent <= length`.
pub fn clamp_tile_start(length: usize, extent: usize, nominal_start: usize) -> Range<usize> {
    let start = nominal_start.min(length - extent);
    start..start + extent
}

/// Crop-sized spans covering `[0, length)` along one axis.
pub fn axis_spans(length: usize, extent: usize, stride: usize) -> Result<Vec<Range<usize>>> {
    let count = tile_count(length, extent, stride)?;
    Ok((0..count)
        .map(|index| clamp_tile_start(length, extent, index * stride))
        .collect())
}

/// One tile rectangle `[y1, y2) x [x1, x2)` and its grid position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRect {
    pub row: usize,
    pub col: usize,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl TileRect {
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.cols.len()
    }

    pub fn contains(&self, y: usize, x: usize) -> bool {
        self.rows.contains(&y) && self.cols.contains(&x)
    }
}

/// Tile layout for one image size. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    height: usize,
    width: usize,
    row_spans: Vec<Range<usize>>,
    col_spans: Vec<Range<usize>>,
}

impl TileGrid {
    pub fn new(
        (height, width): (usize, usize),
        (crop_height, crop_width): (usize, usize),
        (stride_y, stride_x): (usize, usize),
    ) -> Result<Self> {
        if crop_height > height {
            return Err(SegError::validation(
                "crop_height",
                format!("{crop_height} exceeds image height {height}"),
            ));
        }
        if crop_width > width {
            return Err(SegError::validation(
                "crop_width",
                format!("{crop_width} exceeds image width {width}"),
            ));
        }

        Ok(Self {
            height,
            width,
            row_spans: axis_spans(height, crop_height, stride_y)?,
            col_spans: axis_spans(width, crop_width, stride_x)?,
        })
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn tile_rows(&self) -> usize {
        self.row_spans.len()
    }

    pub fn tile_cols(&self) -> usize {
        self.col_spans.len()
    }

    pub fn len(&self) -> usize {
        self.tile_rows() * self.tile_cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = TileRect> + '_ {
        self.row_spans.iter().enumerate().flat_map(move |(row, rows)| {
            self.col_spans
                .iter()
                .enumerate()
                .map(move |(col, cols)| TileRect {
                    row,
                    col,
                    rows: rows.clone(),
                    cols: cols.clone(),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_from_rate() -> Result<()> {
        assert_eq!(stride_from_rate(4, 0.5)?, 2);
        assert_eq!(stride_from_rate(5, 0.5)?, 3);
        assert_eq!(stride_from_rate(10, 0.1)?, 1);
        assert_eq!(stride_from_rate(769, 2.0 / 3.0)?, 513);
        assert_eq!(stride_from_rate(7, 1.0)?, 7);
        Ok(())
    }

    #[test]
    fn test_stride_rate_out_of_range() {
        for rate in [0.0, -0.5, 1.5, f64::NAN] {
            assert!(matches!(
                stride_from_rate(4, rate),
                Err(SegError::Validation { ref field, .. }) if field == "stride_rate"
            ));
        }
    }

    #[test]
    fn test_tile_count_includes_last_tile() -> Result<()> {
        assert_eq!(tile_count(10, 4, 2)?, 4);
        assert_eq!(tile_count(9, 4, 2)?, 4);
        assert_eq!(tile_count(8, 4, 2)?, 3);
        assert_eq!(tile_count(4, 4, 2)?, 1);
        assert_eq!(tile_count(5, 4, 4)?, 2);
        Ok(())
    }

    #[test]
    fn test_stride_longer_than_crop_is_rejected() {
        assert!(matches!(
            tile_count(5, 4, 10),
            Err(SegError::Validation { ref field, .. }) if field == "stride"
        ));
        // One-pixel crop stepping by 5 over 3 rows would never visit row 1.
        assert!(matches!(
            TileGrid::new((3, 1), (1, 1), (5, 1)),
            Err(SegError::Validation { ref field, .. }) if field == "stride"
        ));
    }

    #[test]
    fn test_tile_count_rejects_oversized_crop() {
        assert!(tile_count(3, 4, 2).is_err());
        assert!(tile_count(3, 0, 2).is_err());
        assert!(tile_count(3, 2, 0).is_err());
    }

    #[test]
    fn test_clamp_tile_start() {
        assert_eq!(clamp_tile_start(9, 4, 0), 0..4);
        assert_eq!(clamp_tile_start(9, 4, 4), 4..8);
        assert_eq!(clamp_tile_start(9, 4, 5), 5..9);
        assert_eq!(clamp_tile_start(9, 4, 6), 5..9);
        assert_eq!(clamp_tile_start(4, 4, 0), 0..4);
    }

    #[test]
    fn test_last_span_is_pulled_back() -> Result<()> {
        // 9 rows, crop 4, stride 2: nominal last start 6 would end at 10.
        assert_eq!(axis_spans(9, 4, 2)?, vec![0..4, 2..6, 4..8, 5..9]);
        Ok(())
    }

    #[test]
    fn test_exact_fit_needs_no_clamp() -> Result<()> {
        assert_eq!(axis_spans(10, 4, 2)?, vec![0..4, 2..6, 4..8, 6..10]);
        Ok(())
    }

    #[test]
    fn test_grid_row_major_order() -> Result<()> {
        let grid = TileGrid::new((9, 10), (4, 4), (2, 2))?;
        assert_eq!(grid.tile_rows(), 4);
        assert_eq!(grid.tile_cols(), 4);
        assert_eq!(grid.len(), 16);

        let tiles: Vec<_> = grid.tiles().collect();
        assert_eq!((tiles[0].row, tiles[0].col), (0, 0));
        assert_eq!((tiles[1].row, tiles[1].col), (0, 1));
        assert_eq!((tiles[4].row, tiles[4].col), (1, 0));

        let last = tiles.last().unwrap();
        assert_eq!(last.rows, 5..9);
        assert_eq!(last.cols, 6..10);
        Ok(())
    }

    #[test]
    fn test_crop_equal_to_image_is_single_tile() -> Result<()> {
        let grid = TileGrid::new((6, 8), (6, 8), (3, 4))?;
        let tiles: Vec<_> = grid.tiles().collect();
        assert_eq!(
            tiles,
            vec![TileRect {
                row: 0,
                col: 0,
                rows: 0..6,
                cols: 0..8
            }]
        );
        Ok(())
    }

    #[test]
    fn test_grid_reports_offending_dimension() {
        let err = TileGrid::new((3, 10), (4, 4), (2, 2)).unwrap_err();
        assert!(matches!(err, SegError::Validation { ref field, .. } if field == "crop_height"));

        let err = TileGrid::new((10, 3), (4, 4), (2, 2)).unwrap_err();
        assert!(matches!(err, SegError::Validation { ref field, .. } if field == "crop_width"));
    }

    #[test]
    fn test_rectangular_crop_uses_per_axis_extent() -> Result<()> {
        let grid = TileGrid::new((12, 20), (4, 8), (2, 4))?;
        assert_eq!(grid.tile_rows(), 5);
        assert_eq!(grid.tile_cols(), 4);
        assert!(grid.tiles().all(|t| t.height() == 4 && t.width() == 8));
        Ok(())
    }
}
