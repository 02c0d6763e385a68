use ndarray::prelude::*;
use ndarray::Zip;

use crate::errors::{Result, SegError};

/// Accuracy and IoU figures over everything fed to a [`ConfusionMatrix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSummary {
    pub pixel_accuracy: f64,
    pub mean_class_accuracy: f64,
    pub mean_iou: f64,
}

/// `num_classes x num_classes` pixel counts, rows are ground truth and
/// columns are predictions.
///
/// Ground-truth ids outside `[0, num_classes)` (e.g. the usual 255 ignore
/// label) are not counted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: Array2::zeros((num_classes, num_classes)),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn counts(&self) -> ArrayView2<'_, u64> {
        self.counts.view()
    }

    pub fn update(&mut self, prediction: ArrayView2<usize>, target: ArrayView2<usize>) -> Result<()> {
        if prediction.dim() != target.dim() {
            return Err(SegError::validation(
                "target",
                format!(
                    "shape {:?} does not match prediction shape {:?}",
                    target.shape(),
                    prediction.shape()
                ),
            ));
        }

        let num_classes = self.num_classes();
        for (&predicted, &actual) in prediction.iter().zip(target.iter()) {
            if actual < num_classes && predicted < num_classes {
                self.counts[[actual, predicted]] += 1;
            }
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &Self) {
        self.counts += &other.counts;
    }

    /// `None` until at least one pixel has been counted.
    pub fn summary(&self) -> Option<EvaluationSummary> {
        let total = self.counts.sum();
        if total == 0 {
            return None;
        }

        let diagonal = self.counts.diag().mapv(|v| v as f64);
        let gt_totals = self.counts.sum_axis(Axis(1)).mapv(|v| v as f64);
        let pred_totals = self.counts.sum_axis(Axis(0)).mapv(|v| v as f64);

        let class_accuracy = Zip::from(&diagonal)
            .and(&gt_totals)
            .map_collect(|&hit, &gt| ratio(hit, gt));
        let iou = Zip::from(&diagonal)
            .and(&gt_totals)
            .and(&pred_totals)
            .map_collect(|&hit, &gt, &pred| ratio(hit, gt + pred - hit));

        Some(EvaluationSummary {
            pixel_accuracy: diagonal.sum() / total as f64,
            mean_class_accuracy: nan_mean(class_accuracy.view()),
            mean_iou: nan_mean(iou.view()),
        })
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Mean over classes that appeared at all.
fn nan_mean(values: ArrayView1<Option<f64>>) -> f64 {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return 0.0;
    }
    present.iter().sum::<f64>() / present.len() as f64
}
