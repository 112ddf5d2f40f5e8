//! Layer-normalised LSTM cell

use crate::error::{ModelError, Result};
use crate::model::layers::{sigmoid, LayerNorm};
use crate::model::params::{scoped, Initializer, ParamStore};
use ndarray::{concatenate, s, Array2, Axis};

/// Cell and hidden state, each [batch, num_units]
#[derive(Debug, Clone, PartialEq)]
pub struct LstmState {
    pub c: Array2<f32>,
    pub h: Array2<f32>,
}

impl LstmState {
    pub fn zeros(batch_size: usize, num_units: usize) -> Self {
        Self {
            c: Array2::zeros((batch_size, num_units)),
            h: Array2::zeros((batch_size, num_units)),
        }
    }
}

/// LSTM cell with layer normalisation on every gate and on the cell state
///
/// The four gates come from one matrix product over `[x, h]` without bias;
/// the layer-norm shift plays that role. Gate order is input, transform,
/// forget, output.
#[derive(Debug, Clone)]
pub struct LayerNormLstmCell {
    pub name: String,
    pub input_size: usize,
    pub num_units: usize,
    pub forget_bias: f32,
    gate_norms: [LayerNorm; 4],
    state_norm: LayerNorm,
}

impl LayerNormLstmCell {
    pub fn new(name: impl Into<String>, input_size: usize, num_units: usize) -> Self {
        let name = name.into();
        let norm = |gate: &str| LayerNorm::new(scoped(&name, gate), num_units);
        let gate_norms = [norm("input"), norm("transform"), norm("forget"), norm("output")];
        let state_norm = norm("state");
        Self {
            name,
            input_size,
            num_units,
            forget_bias: 1.0,
            gate_norms,
            state_norm,
        }
    }

    fn kernel_name(&self) -> String {
        scoped(&self.name, "kernel")
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        store.get_or_create(
            &self.kernel_name(),
            &[self.input_size + self.num_units, 4 * self.num_units],
            Initializer::GlorotUniform,
            true,
        )?;
        for norm in self.gate_norms.iter().chain(std::iter::once(&self.state_norm)) {
            norm.build(store)?;
        }
        Ok(())
    }

    pub fn zero_state(&self, batch_size: usize) -> LstmState {
        LstmState::zeros(batch_size, self.num_units)
    }

    /// One time step; the new hidden state is also the cell output
    pub fn step(&self, store: &ParamStore, x: &Array2<f32>, state: &LstmState) -> Result<LstmState> {
        if x.ncols() != self.input_size {
            return Err(ModelError::shape_mismatch(&self.name, self.input_size, x.ncols()));
        }
        let units = self.num_units;
        let kernel = store.get2(&self.kernel_name())?;

        let args = concatenate(Axis(1), &[x.view(), state.h.view()])?;
        let gates = args.dot(&kernel);

        let gate = |idx: usize| -> Result<Array2<f32>> {
            let raw = gates.slice(s![.., idx * units..(idx + 1) * units]).to_owned();
            self.gate_norms[idx].forward(store, &raw)
        };
        let i = gate(0)?;
        let j = gate(1)?;
        let f = gate(2)?;
        let o = gate(3)?;

        let forget_bias = self.forget_bias;
        let c = &state.c * &f.mapv(|v| sigmoid(v + forget_bias)) + &(i.mapv(sigmoid) * &j.mapv(f32::tanh));
        let c = self.state_norm.forward(store, &c)?;
        let h = c.mapv(f32::tanh) * &o.mapv(sigmoid);

        Ok(LstmState { c, h })
    }

    pub fn num_params(&self) -> usize {
        (self.input_size + self.num_units) * 4 * self.num_units + 5 * 2 * self.num_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_step_shapes() {
        let mut store = ParamStore::new(Some(0));
        let cell = LayerNormLstmCell::new("lstm", 5, 8);
        cell.build(&mut store).unwrap();

        let state = cell.zero_state(3);
        let next = cell.step(&store, &Array2::ones((3, 5)), &state).unwrap();
        assert_eq!(next.c.shape(), &[3, 8]);
        assert_eq!(next.h.shape(), &[3, 8]);
        assert!(next.h.iter().all(|v| v.abs() <= 1.0));
        assert_eq!(store.num_params(), cell.num_params());
    }

    #[test]
    fn test_rows_are_independent() {
        let mut store = ParamStore::new(Some(0));
        let cell = LayerNormLstmCell::new("lstm", 4, 6);
        cell.build(&mut store).unwrap();

        let x = Array2::from_shape_fn((2, 4), |(b, i)| (b * 4 + i) as f32 * 0.1);
        let batched = cell.step(&store, &x, &cell.zero_state(2)).unwrap();

        let single = cell
            .step(&store, &x.slice(s![1..2, ..]).to_owned(), &cell.zero_state(1))
            .unwrap();
        for (a, b) in batched.h.row(1).iter().zip(single.h.row(0).iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_wrong_input_width() {
        let mut store = ParamStore::new(Some(0));
        let cell = LayerNormLstmCell::new("lstm", 4, 6);
        cell.build(&mut store).unwrap();
        assert!(cell
            .step(&store, &Array2::ones((1, 3)), &cell.zero_state(1))
            .is_err());
    }
}
