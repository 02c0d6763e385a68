use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{Result, SegError};
use crate::traits::{CropScorer, ScoreOutput};
use ndarray::prelude::*;
use parking_lot::Mutex;

/// テスト用：全ピクセルに同じスコアベクトルを返す
#[derive(Debug, Clone)]
pub struct ConstantScorer {
    pub scores: Vec<f32>,
}

impl ConstantScorer {
    pub const fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }
}

impl CropScorer for ConstantScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let (batch, _, height, width) = crop.dim();
        let scores = Array4::from_shape_fn(
            (batch, self.scores.len(), height, width),
            |(_, class, _, _)| self.scores[class],
        );
        Ok(scores.into())
    }
}

/// テスト用：1クラスだけにスコアを立てる
#[derive(Debug, Clone)]
pub struct OneHotScorer {
    pub num_classes: usize,
    pub class: usize,
}

impl OneHotScorer {
    pub const fn new(num_classes: usize, class: usize) -> Self {
        Self { num_classes, class }
    }

    fn one_hot(&self, batch: usize, height: usize, width: usize) -> Array4<f32> {
        let mut scores = Array4::zeros((batch, self.num_classes, height, width));
        scores.slice_mut(s![.., self.class, .., ..]).fill(1.0);
        scores
    }
}

impl CropScorer for OneHotScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let (batch, _, height, width) = crop.dim();
        Ok(self.one_hot(batch, height, width).into())
    }
}

/// ピクセル単位のモデル：クラス `k` のスコアは `weights[k] * sum(channels)`
///
/// 結果はそのピクセルにしか依存しないため、タイル分割で変わってはならない
#[derive(Debug, Clone)]
pub struct LinearScorer {
    pub weights: Vec<f32>,
}

impl LinearScorer {
    pub const fn new(weights: Vec<f32>) -> Self {
        Self { weights }
    }
}

impl CropScorer for LinearScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let (batch, _, height, width) = crop.dim();
        let intensity = crop.sum_axis(Axis(1));
        let scores = Array4::from_shape_fn(
            (batch, self.weights.len(), height, width),
            |(n, class, y, x)| self.weights[class] * intensity[[n, y, x]],
        );
        Ok(scores.into())
    }
}

/// 主ヘッドは `class` のone-hot、補助ヘッドはより大きなスコアでクラス0
#[derive(Debug, Clone)]
pub struct AuxHeadScorer {
    main: OneHotScorer,
}

impl AuxHeadScorer {
    pub const fn new(num_classes: usize, class: usize) -> Self {
        Self {
            main: OneHotScorer::new(num_classes, class),
        }
    }
}

impl CropScorer for AuxHeadScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let (batch, _, height, width) = crop.dim();
        let main = self.main.one_hot(batch, height, width);
        let mut aux = Array4::zeros(main.raw_dim());
        aux.slice_mut(s![.., 0, .., ..]).fill(10.0);
        Ok(ScoreOutput::Composite(vec![main, aux]))
    }
}

/// `fail_at` 回目（0始まり）の呼び出しで失敗し、それ以外はクラス0のone-hot
#[derive(Debug)]
pub struct FailingScorer {
    inner: OneHotScorer,
    fail_at: usize,
    calls: AtomicUsize,
}

impl FailingScorer {
    pub const fn new(num_classes: usize, fail_at: usize) -> Self {
        Self {
            inner: OneHotScorer::new(num_classes, 0),
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CropScorer for FailingScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_at {
            return Err(SegError::Model {
                operation: format!("モック推論 {call} 回目"),
                source: Box::new(std::io::Error::other("スコアラー失敗")),
            });
        }
        self.inner.score(crop)
    }
}

/// 高さが1ピクセル足りないスコアを返す
#[derive(Debug, Clone)]
pub struct WrongShapeScorer {
    pub num_classes: usize,
}

impl WrongShapeScorer {
    pub const fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl CropScorer for WrongShapeScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let (batch, _, height, width) = crop.dim();
        Ok(Array4::<f32>::zeros((batch, self.num_classes, height.saturating_sub(1), width)).into())
    }
}

/// ラップしたスコアラーに渡されたクロップの形状を記録
#[derive(Debug)]
pub struct RecordingScorer<S> {
    inner: S,
    shapes: Mutex<Vec<(usize, usize, usize, usize)>>,
}

impl<S: CropScorer> RecordingScorer<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            shapes: Mutex::new(Vec::new()),
        }
    }

    pub fn shapes(&self) -> Vec<(usize, usize, usize, usize)> {
        self.shapes.lock().clone()
    }
}

impl<S: CropScorer> CropScorer for RecordingScorer<S> {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        self.shapes.lock().push(crop.dim());
        self.inner.score(crop)
    }

    fn crop_size(&self) -> Option<(usize, usize)> {
        self.inner.crop_size()
    }
}

/// 固定入力サイズを持つスコアラー（モデルからクロップサイズを決める処理のテスト用）
#[derive(Debug, Clone)]
pub struct FixedCropScorer {
    pub crop: (usize, usize),
    inner: OneHotScorer,
}

impl FixedCropScorer {
    pub const fn new(crop: (usize, usize), num_classes: usize, class: usize) -> Self {
        Self {
            crop,
            inner: OneHotScorer::new(num_classes, class),
        }
    }
}

impl CropScorer for FixedCropScorer {
    fn score(&self, crop: ArrayView4<f32>) -> Result<ScoreOutput> {
        let (_, _, height, width) = crop.dim();
        if (height, width) != self.crop {
            return Err(SegError::validation(
                "crop",
                format!("expected {:?}, got {:?}", self.crop, (height, width)),
            ));
        }
        self.inner.score(crop)
    }

    fn crop_size(&self) -> Option<(usize, usize)> {
        Some(self.crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_scorer_is_pixelwise() -> Result<()> {
        let crop = Array4::from_shape_fn((1, 2, 2, 2), |(_, c, y, x)| (c + y * 2 + x) as f32);
        let scores = LinearScorer::new(vec![1.0, -2.0])
            .score(crop.view())?
            .into_primary()?;

        assert_eq!(scores.dim(), (1, 2, 2, 2));
        // (1, 1) のチャンネル和: 3 + 4
        assert_eq!(scores[[0, 0, 1, 1]], 7.0);
        assert_eq!(scores[[0, 1, 1, 1]], -14.0);
        Ok(())
    }

    #[test]
    fn test_failing_scorer_counts_calls() {
        let scorer = FailingScorer::new(2, 1);
        let crop = Array4::<f32>::zeros((1, 3, 2, 2));

        assert!(scorer.score(crop.view()).is_ok());
        assert!(scorer.score(crop.view()).is_err());
        assert_eq!(scorer.calls(), 2);
    }

    #[test]
    fn test_fixed_crop_scorer_rejects_other_sizes() {
        let scorer = FixedCropScorer::new((4, 4), 2, 1);
        assert_eq!(scorer.crop_size(), Some((4, 4)));
        assert!(scorer.score(Array4::<f32>::zeros((1, 3, 4, 5)).view()).is_err());
    }
}
