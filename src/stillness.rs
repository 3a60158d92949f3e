// src/stillness.rs
//
// Noise-tolerant stillness test over a track's recent center positions.
// Not a velocity test: a slowly drifting car stays "moving" only once its
// span exceeds the pixel threshold within the window.

use crate::types::CenterSample;
use std::collections::VecDeque;

/// True iff the window is full and no sample deviates from the window
/// centroid by `threshold_px` or more.
///
/// Fewer than `window_size` samples is not enough evidence — returns false.
pub fn is_still(history: &VecDeque<CenterSample>, window_size: usize, threshold_px: f32) -> bool {
    if window_size == 0 || history.len() < window_size {
        return false;
    }

    let n = history.len() as f32;
    let (sum_x, sum_y) = history
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), s| (sx + s.x, sy + s.y));
    let (mean_x, mean_y) = (sum_x / n, sum_y / n);

    let max_dist = history
        .iter()
        .map(|s| ((s.x - mean_x).powi(2) + (s.y - mean_y).powi(2)).sqrt())
        .fold(0.0f32, f32::max);

    max_dist < threshold_px
}
