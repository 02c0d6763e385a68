//! Tiled inference: score every tile, average the overlaps, take the argmax.

use std::time::{Duration, Instant};

use ndarray::prelude::*;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::errors::{Result, SegError};
use crate::reduce::argmax_labels;
use crate::tiling::{stride_from_rate, TileGrid, TileRect};
use crate::traits::CropScorer;

/// Validated sliding-window parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindow {
    crop_height: usize,
    crop_width: usize,
    num_classes: usize,
    stride_rate: f64,
}

impl SlidingWindow {
    pub fn new(
        (crop_height, crop_width): (usize, usize),
        num_classes: usize,
        stride_rate: f64,
    ) -> Result<Self> {
        if crop_height == 0 {
            return Err(SegError::validation("crop_height", "must be positive"));
        }
        if crop_width == 0 {
            return Err(SegError::validation("crop_width", "must be positive"));
        }
        if num_classes == 0 {
            return Err(SegError::validation("num_classes", "must be positive"));
        }
        // Surface a bad rate here rather than on the first image.
        stride_from_rate(crop_height, stride_rate)?;

        Ok(Self {
            crop_height,
            crop_width,
            num_classes,
            stride_rate,
        })
    }

    pub const fn crop_size(&self) -> (usize, usize) {
        (self.crop_height, self.crop_width)
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub const fn stride_rate(&self) -> f64 {
        self.stride_rate
    }

    /// Row and column strides.
    pub fn strides(&self) -> Result<(usize, usize)> {
        Ok((
            stride_from_rate(self.crop_height, self.stride_rate)?,
            stride_from_rate(self.crop_width, self.stride_rate)?,
        ))
    }

    pub fn grid(&self, height: usize, width: usize) -> Result<TileGrid> {
        TileGrid::new((height, width), self.crop_size(), self.strides()?)
    }
}

/// How tiles are dispatched to the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    #[default]
    Sequential,
    /// Score tiles on the rayon pool. Accumulation still runs in grid order,
    /// so results match `Sequential` bit for bit.
    Parallel,
}

/// Normalized scores and the label map derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// `[batch, num_classes, height, width]`, averaged over overlapping tiles.
    pub scores: Array4<f32>,
    /// `[batch, height, width]` class indices.
    pub labels: Array3<usize>,
}

/// Running sum of tile scores plus per-pixel coverage counts.
///
/// Owned by a single inference call; `finish` consumes it.
#[derive(Debug)]
pub struct ScoreAccumulator {
    scores: Array4<f32>,
    counts: Array2<u32>,
}

impl ScoreAccumulator {
    pub fn new(batch: usize, num_classes: usize, height: usize, width: usize) -> Self {
        Self {
            scores: Array4::zeros((batch, num_classes, height, width)),
            counts: Array2::zeros((height, width)),
        }
    }

    /// Adds one tile's scores at its rectangle.
    pub fn add(&mut self, tile: &TileRect, tile_scores: ArrayView4<f32>) -> Result<()> {
        let (batch, num_classes, _, _) = self.scores.dim();
        let expected = (batch, num_classes, tile.height(), tile.width());
        if tile_scores.dim() != expected {
            return Err(SegError::validation(
                "scores",
                format!(
                    "expected shape {:?} for tile ({}, {}), got {:?}",
                    expected,
                    tile.row,
                    tile.col,
                    tile_scores.shape()
                ),
            ));
        }

        let mut region = self
            .scores
            .slice_mut(s![.., .., tile.rows.clone(), tile.cols.clone()]);
        region += &tile_scores;
        self.counts
            .slice_mut(s![tile.rows.clone(), tile.cols.clone()])
            .mapv_inplace(|count| count + 1);
        Ok(())
    }

    pub fn counts(&self) -> ArrayView2<'_, u32> {
        self.counts.view()
    }

    /// Divides the summed scores by the coverage counts.
    ///
    /// # Panics
    ///
    /// If any pixel was never covered by a tile. A correct grid covers every
    /// pixel, so this indicates a bug in grid construction.
    pub fn finish(self) -> Array4<f32> {
        let Self { mut scores, counts } = self;
        if let Some(((y, x), _)) = counts.indexed_iter().find(|&(_, &count)| count == 0) {
            panic!("tile grid left pixel ({y}, {x}) uncovered");
        }
        scores /= &counts.mapv(|count| count as f32);
        scores
    }
}

/// Sliding-window inference over images larger than the scorer's crop.
#[derive(Debug, Clone)]
pub struct TiledInference {
    window: SlidingWindow,
    schedule: Schedule,
    deadline: Option<Duration>,
}

impl TiledInference {
    pub const fn new(window: SlidingWindow) -> Self {
        Self {
            window,
            schedule: Schedule::Sequential,
            deadline: None,
        }
    }

    pub const fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Bounds the wall-clock time of a whole call. Checked before each tile.
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub const fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Runs tiled inference on a `[batch, channels, height, width]` image.
    pub fn infer<S>(&self, scorer: &S, image: ArrayView4<f32>) -> Result<Prediction>
    where
        S: CropScorer + ?Sized,
    {
        let scores = self.infer_scores(scorer, image)?;
        let labels = argmax_labels(scores.view());
        Ok(Prediction { scores, labels })
    }

    /// Normalized per-class scores without the label reduction.
    pub fn infer_scores<S>(&self, scorer: &S, image: ArrayView4<f32>) -> Result<Array4<f32>>
    where
        S: CropScorer + ?Sized,
    {
        let started = Instant::now();
        let (batch, channels, height, width) = image.dim();
        if batch == 0 {
            return Err(SegError::validation("batch", "must contain at least one image"));
        }
        if channels == 0 {
            return Err(SegError::validation("channels", "must be positive"));
        }

        let grid = self.window.grid(height, width)?;
        debug!(
            height,
            width,
            tile_rows = grid.tile_rows(),
            tile_cols = grid.tile_cols(),
            schedule = ?self.schedule,
            "Starting tiled inference"
        );

        let mut accumulator =
            ScoreAccumulator::new(batch, self.window.num_classes(), height, width);

        match self.schedule {
            Schedule::Sequential => {
                for tile in grid.tiles() {
                    self.check_deadline(started)?;
                    let tile_scores = score_tile(scorer, image, &tile)?;
                    accumulator.add(&tile, tile_scores.view())?;
                }
            }
            Schedule::Parallel => {
                let tiles: Vec<TileRect> = grid.tiles().collect();
                let scored = tiles
                    .par_iter()
                    .map(|tile| {
                        self.check_deadline(started)?;
                        score_tile(scorer, image, tile)
                    })
                    .collect::<Result<Vec<_>>>()?;
                for (tile, tile_scores) in tiles.iter().zip(&scored) {
                    accumulator.add(tile, tile_scores.view())?;
                }
            }
        }

        let scores = accumulator.finish();
        debug!(elapsed = ?started.elapsed(), tiles = grid.len(), "Tiled inference finished");
        Ok(scores)
    }

    fn check_deadline(&self, started: Instant) -> Result<()> {
        match self.deadline {
            Some(limit) if started.elapsed() >= limit => Err(SegError::DeadlineExceeded {
                limit,
                elapsed: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

fn score_tile<S>(scorer: &S, image: ArrayView4<f32>, tile: &TileRect) -> Result<Array4<f32>>
where
    S: CropScorer + ?Sized,
{
    trace!(row = tile.row, col = tile.col, rows = ?tile.rows, cols = ?tile.cols, "Scoring tile");
    let crop = image.slice(s![.., .., tile.rows.clone(), tile.cols.clone()]);
    scorer.score(crop)?.into_primary()
}
