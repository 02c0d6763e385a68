use ndarray::prelude::*;
use num_traits::Float;

/// Index of the largest score.
///
/// Ties go to the lowest index and NaN scores are skipped. A lane with no
/// comparable score (empty or all NaN) yields 0.
pub fn first_argmax<'a, A, I>(scores: I) -> usize
where
    A: Float + 'a,
    I: IntoIterator<Item = &'a A>,
{
    let mut best: Option<(usize, A)> = None;
    for (index, &score) in scores.into_iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }
    best.map_or(0, |(index, _)| index)
}

/// Reduces `[batch, num_classes, height, width]` scores to a
/// `[batch, height, width]` label map.
pub fn argmax_labels<A: Float>(scores: ArrayView4<A>) -> Array3<usize> {
    let (batch, _, height, width) = scores.dim();
    Array3::from_shape_fn((batch, height, width), |(n, y, x)| {
        first_argmax(scores.slice(s![n, .., y, x]))
    })
}
