//! Length-masked unrolling of the recurrent aggregator

use super::attention::{AttentionLstm, AttentionState};
use crate::error::{ModelError, Result};
use crate::model::params::ParamStore;
use ndarray::{Array, Array1, Array3, Axis, Dimension, RemoveAxis};

/// Runs `rnn` over `inputs` [batch, time, features]
///
/// Example `b` only advances for `t < lengths[b]`. Past its length its output
/// row is zero and its state is carried unchanged, so the returned final state
/// is the state after its last valid step.
pub fn dynamic_rnn(
    rnn: &AttentionLstm,
    store: &ParamStore,
    inputs: &Array3<f32>,
    lengths: &Array1<usize>,
) -> Result<(Array3<f32>, AttentionState)> {
    let (batch_size, max_time, _) = inputs.dim();
    if lengths.len() != batch_size {
        return Err(ModelError::shape_mismatch("sequence lengths", batch_size, lengths.len()));
    }

    let mut outputs = Array3::zeros((batch_size, max_time, rnn.output_size()));
    let mut state = rnn.zero_state(batch_size);

    for t in 0..max_time {
        let active: Vec<bool> = lengths.iter().map(|&len| t < len).collect();
        if !active.iter().any(|&a| a) {
            break;
        }

        let x = inputs.index_axis(Axis(1), t).to_owned();
        let (mut output, mut next) = rnn.step(store, &x, &state)?;

        for (b, &is_active) in active.iter().enumerate() {
            if !is_active {
                output.row_mut(b).fill(0.0);
            }
        }
        carry_rows(&mut next.cell.c, &state.cell.c, &active);
        carry_rows(&mut next.cell.h, &state.cell.h, &active);
        carry_rows(&mut next.attns, &state.attns, &active);
        carry_rows(&mut next.window, &state.window, &active);

        outputs.index_axis_mut(Axis(1), t).assign(&output);
        state = next;
    }

    Ok((outputs, state))
}

/// Restores the batch rows of `next` that are not active from `previous`
fn carry_rows<D>(next: &mut Array<f32, D>, previous: &Array<f32, D>, active: &[bool])
where
    D: Dimension + RemoveAxis,
{
    for (b, &is_active) in active.iter().enumerate() {
        if !is_active {
            next.index_axis_mut(Axis(0), b)
                .assign(&previous.index_axis(Axis(0), b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn setup() -> (ParamStore, AttentionLstm) {
        let mut store = ParamStore::new(Some(11));
        let rnn = AttentionLstm::new("attention_cell", 4, 5, 3);
        rnn.build(&mut store).unwrap();
        (store, rnn)
    }

    fn inputs(batch_size: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch_size, 3, 4), |(b, t, f)| ((b + 1) * (t + 2) + f) as f32 * 0.05)
    }

    #[test]
    fn test_outputs_zero_past_length() {
        let (store, rnn) = setup();
        let lengths = Array1::from(vec![2, 0]);
        let (outputs, _) = dynamic_rnn(&rnn, &store, &inputs(2), &lengths).unwrap();

        assert_eq!(outputs.shape(), &[2, 3, 5]);
        assert!(outputs.slice(s![0, 2, ..]).iter().all(|&v| v == 0.0));
        assert!(outputs.slice(s![1, .., ..]).iter().all(|&v| v == 0.0));
        assert!(outputs.slice(s![0, 0, ..]).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_state_frozen_after_length() {
        let (store, rnn) = setup();
        let data = inputs(1);

        let (short_outputs, short_state) =
            dynamic_rnn(&rnn, &store, &data, &Array1::from(vec![1])).unwrap();

        // Same data truncated to one step must give the same state
        let truncated = data.slice(s![.., ..1, ..]).to_owned();
        let (_, truncated_state) =
            dynamic_rnn(&rnn, &store, &truncated, &Array1::from(vec![1])).unwrap();

        assert_eq!(short_state, truncated_state);
        assert!(short_outputs.slice(s![0, 1.., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_examples_do_not_interact() {
        let (store, rnn) = setup();
        let data = inputs(2);
        let (batched, _) = dynamic_rnn(&rnn, &store, &data, &Array1::from(vec![3, 1])).unwrap();

        let first = data.slice(s![..1, .., ..]).to_owned();
        let (alone, _) = dynamic_rnn(&rnn, &store, &first, &Array1::from(vec![3])).unwrap();

        for (a, b) in batched.slice(s![0, .., ..]).iter().zip(alone.slice(s![0, .., ..]).iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_lengths_must_match_batch() {
        let (store, rnn) = setup();
        assert!(dynamic_rnn(&rnn, &store, &inputs(2), &Array1::from(vec![1])).is_err());
    }
}
