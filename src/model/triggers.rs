//! Trigger counting
//!
//! The number of triggered telescopes of an event becomes the sequence length
//! of the recurrent aggregator for that event.

use ndarray::{Array1, Array2, Axis};
use tracing::warn;

/// Per-event count of triggered telescopes, bounded to [0, num_telescopes]
///
/// `triggers` is [batch, telescope] with 0.0/1.0 flags. The sum is truncated
/// towards zero, so fractional flags never round up.
pub fn valid_lengths(triggers: &Array2<f32>) -> Array1<usize> {
    let num_telescopes = triggers.ncols();
    triggers.sum_axis(Axis(1)).mapv(|count| {
        let count = count.trunc();
        if count < 0.0 || count > num_telescopes as f32 || count.is_nan() {
            warn!(
                "Trigger count {} outside [0, {}], clamping",
                count, num_telescopes
            );
        }
        if count.is_nan() || count <= 0.0 {
            0
        } else {
            (count as usize).min(num_telescopes)
        }
    })
}
