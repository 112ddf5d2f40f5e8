//! Last-valid-timestep selection

use crate::error::{ModelError, Result};
use ndarray::{Array1, Array2, Array3, Axis};

/// Gathers, for every example, the output at its last valid timestep
///
/// `outputs` is [batch, time, hidden]. Example `b` reads timestep
/// `lengths[b] - 1`, or the final timestep when its length is zero.
pub fn gather_last_valid(outputs: &Array3<f32>, lengths: &Array1<usize>) -> Result<Array2<f32>> {
    let (batch_size, max_time, hidden) = outputs.dim();
    if lengths.len() != batch_size {
        return Err(ModelError::shape_mismatch("sequence lengths", batch_size, lengths.len()));
    }
    if max_time == 0 {
        return Err(ModelError::shape_mismatch("recurrent outputs time axis", "> 0", max_time));
    }

    let indices: Vec<usize> = lengths
        .iter()
        .enumerate()
        .map(|(b, &len)| {
            let t = if len == 0 { max_time - 1 } else { len.min(max_time) - 1 };
            b * max_time + t
        })
        .collect();

    let flat = outputs.to_shape((batch_size * max_time, hidden))?;
    Ok(flat.select(Axis(0), &indices))
}
