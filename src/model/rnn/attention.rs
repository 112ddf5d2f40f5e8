//! Attention wrapper around the layer-normalised LSTM
//!
//! The wrapper keeps a window of its last `attn_length` outputs. At every step
//! the cell state queries that window with additive attention, and the
//! attention read-out is fed back into both the next input and the output.

use super::lstm::{LayerNormLstmCell, LstmState};
use crate::error::Result;
use crate::model::layers::{Activation, Dense};
use crate::model::params::{scoped, Initializer, ParamStore};
use ndarray::{concatenate, s, Array1, Array2, Array3, Axis};

/// Full recurrent state carried between steps
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionState {
    pub cell: LstmState,
    /// Last attention read-out, [batch, attn_size]
    pub attns: Array2<f32>,
    /// Previous outputs, oldest first, [batch, attn_length, attn_size]
    pub window: Array3<f32>,
}

#[derive(Debug, Clone)]
pub struct AttentionLstm {
    pub name: String,
    pub input_size: usize,
    pub attn_length: usize,
    cell: LayerNormLstmCell,
    input_projection: Dense,
    query: Dense,
    output_projection: Dense,
}

impl AttentionLstm {
    /// `attn_size` equals the cell's unit count
    pub fn new(name: impl Into<String>, input_size: usize, num_units: usize, attn_length: usize) -> Self {
        let name = name.into();
        Self {
            cell: LayerNormLstmCell::new(scoped(&name, "lstm"), input_size, num_units),
            input_projection: Dense::new(
                scoped(&name, "input_projection"),
                input_size + num_units,
                input_size,
                Activation::Linear,
            ),
            query: Dense::new(
                scoped(&name, "attention/query"),
                2 * num_units,
                num_units,
                Activation::Linear,
            ),
            output_projection: Dense::new(
                scoped(&name, "output_projection"),
                2 * num_units,
                num_units,
                Activation::Linear,
            ),
            name,
            input_size,
            attn_length,
        }
    }

    pub fn attn_size(&self) -> usize {
        self.cell.num_units
    }

    pub fn output_size(&self) -> usize {
        self.cell.num_units
    }

    fn attn_kernel_name(&self) -> String {
        scoped(&self.name, "attention/attn_w")
    }

    fn attn_v_name(&self) -> String {
        scoped(&self.name, "attention/attn_v")
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        let attn_size = self.attn_size();
        self.input_projection.build(store)?;
        self.cell.build(store)?;
        store.get_or_create(
            &self.attn_kernel_name(),
            &[attn_size, attn_size],
            Initializer::GlorotUniform,
            true,
        )?;
        store.get_or_create(&self.attn_v_name(), &[attn_size], Initializer::GlorotUniform, true)?;
        self.query.build(store)?;
        self.output_projection.build(store)
    }

    pub fn zero_state(&self, batch_size: usize) -> AttentionState {
        let attn_size = self.attn_size();
        AttentionState {
            cell: self.cell.zero_state(batch_size),
            attns: Array2::zeros((batch_size, attn_size)),
            window: Array3::zeros((batch_size, self.attn_length, attn_size)),
        }
    }

    /// One step; returns the output [batch, attn_size] and the next state
    pub fn step(
        &self,
        store: &ParamStore,
        x: &Array2<f32>,
        state: &AttentionState,
    ) -> Result<(Array2<f32>, AttentionState)> {
        let inputs = concatenate(Axis(1), &[x.view(), state.attns.view()])?;
        let inputs = self.input_projection.forward(store, &inputs)?;

        let cell = self.cell.step(store, &inputs, &state.cell)?;
        let query = concatenate(Axis(1), &[cell.c.view(), cell.h.view()])?;
        let attns = self.attend(store, &query, &state.window)?;

        let output = concatenate(Axis(1), &[cell.h.view(), attns.view()])?;
        let output = self.output_projection.forward(store, &output)?;

        let mut window = Array3::zeros(state.window.raw_dim());
        if self.attn_length > 0 {
            let keep = self.attn_length - 1;
            window
                .slice_mut(s![.., ..keep, ..])
                .assign(&state.window.slice(s![.., 1.., ..]));
            window.index_axis_mut(Axis(1), keep).assign(&output);
        }

        Ok((output, AttentionState { cell, attns, window }))
    }

    /// Additive attention: softmax_l(v · tanh(W h_l + q)) weighted sum of h_l
    fn attend(&self, store: &ParamStore, query: &Array2<f32>, window: &Array3<f32>) -> Result<Array2<f32>> {
        let (batch_size, attn_length, attn_size) = window.dim();
        if attn_length == 0 {
            return Ok(Array2::zeros((batch_size, attn_size)));
        }
        let kernel = store.get2(&self.attn_kernel_name())?;
        let v = store.get1(&self.attn_v_name())?;

        let flat = window.to_shape((batch_size * attn_length, attn_size))?;
        let features = flat.dot(&kernel).into_shape((batch_size, attn_length, attn_size))?;
        let y = self.query.forward(store, query)?;

        let mut attns = Array2::zeros((batch_size, attn_size));
        for b in 0..batch_size {
            let projected = &features.index_axis(Axis(0), b) + &y.row(b);
            let scores: Array1<f32> = projected.mapv(f32::tanh).dot(&v);
            let weights = softmax(&scores);
            attns
                .row_mut(b)
                .assign(&weights.dot(&window.index_axis(Axis(0), b)));
        }
        Ok(attns)
    }
}

fn softmax(scores: &Array1<f32>) -> Array1<f32> {
    let max = scores.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp = scores.mapv(|s| (s - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wrapper(store: &mut ParamStore) -> AttentionLstm {
        let rnn = AttentionLstm::new("attention_cell", 5, 6, 3);
        rnn.build(store).unwrap();
        rnn
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let weights = softmax(&Array1::from(vec![1.0, 2.0, 3.0]));
        assert_relative_eq!(weights.sum(), 1.0, epsilon = 1e-6);
        assert!(weights[2] > weights[1] && weights[1] > weights[0]);
    }

    #[test]
    fn test_step_shapes() {
        let mut store = ParamStore::new(Some(0));
        let rnn = wrapper(&mut store);

        let state = rnn.zero_state(2);
        let (output, next) = rnn.step(&store, &Array2::ones((2, 5)), &state).unwrap();
        assert_eq!(output.shape(), &[2, 6]);
        assert_eq!(next.attns.shape(), &[2, 6]);
        assert_eq!(next.window.shape(), &[2, 3, 6]);
    }

    #[test]
    fn test_window_shifts_and_appends_output() {
        let mut store = ParamStore::new(Some(0));
        let rnn = wrapper(&mut store);

        let x = Array2::from_elem((1, 5), 0.5);
        let (first, state) = rnn.step(&store, &x, &rnn.zero_state(1)).unwrap();
        let (second, state) = rnn.step(&store, &x, &state).unwrap();

        assert_eq!(state.window.slice(s![0, 0, ..]).sum(), 0.0);
        assert_eq!(state.window.slice(s![0, 1, ..]), first.row(0));
        assert_eq!(state.window.slice(s![0, 2, ..]), second.row(0));
    }

    #[test]
    fn test_zero_window_gives_zero_attention() {
        let mut store = ParamStore::new(Some(0));
        let rnn = wrapper(&mut store);

        let (_, state) = rnn.step(&store, &Array2::ones((1, 5)), &rnn.zero_state(1)).unwrap();
        assert!(state.attns.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_params_scoped_under_wrapper() {
        let mut store = ParamStore::new(Some(0));
        wrapper(&mut store);
        assert!(store.contains("attention_cell/lstm/kernel"));
        assert!(store.contains("attention_cell/attention/attn_v"));
        assert_eq!(store.num_params_in_scope("attention_cell/"), store.num_params());
    }
}
