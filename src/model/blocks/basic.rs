//! Basic convolutional block: conv → ReLU → max-pool, three times

use super::{CnnBlockKind, ConvBlock};
use crate::error::Result;
use crate::model::layers::{max_pool2d, Activation, Conv2d, Padding};
use crate::model::params::{scoped, ParamStore};
use ndarray::Array4;

/// Filters of the successive convolution stages
const FILTERS: [usize; 3] = [32, 64, 128];

#[derive(Debug, Clone)]
pub struct BasicConvBlock {
    convs: Vec<Conv2d>,
}

impl BasicConvBlock {
    pub fn new(scope: &str, in_channels: usize) -> Self {
        let mut convs = Vec::with_capacity(FILTERS.len());
        let mut channels = in_channels;
        for (i, &filters) in FILTERS.iter().enumerate() {
            convs.push(
                Conv2d::new(scoped(scope, &format!("conv{}", i + 1)), channels, filters, 3)
                    .with_activation(Activation::Relu),
            );
            channels = filters;
        }
        Self { convs }
    }
}

impl ConvBlock for BasicConvBlock {
    fn kind(&self) -> CnnBlockKind {
        CnnBlockKind::Basic
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        for conv in &self.convs {
            conv.build(store)?;
        }
        Ok(())
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, _is_training: bool) -> Result<Array4<f32>> {
        let mut out = x.clone();
        for conv in &self.convs {
            out = conv.forward(store, &out)?;
            out = max_pool2d(&out, 2, 2, Padding::Same)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_output_shape() {
        let mut store = ParamStore::new(Some(0));
        let block = BasicConvBlock::new("cnn_block", 1);
        block.build(&mut store).unwrap();

        let output = block.forward(&store, &Array4::ones((2, 8, 8, 1)), true).unwrap();
        assert_eq!(output.shape(), &[2, 1, 1, 128]);
    }

    #[test]
    fn test_basic_param_count() {
        let mut store = ParamStore::new(Some(0));
        BasicConvBlock::new("cnn_block", 1).build(&mut store).unwrap();
        let expected = (9 * 32 + 32) + (9 * 32 * 64 + 64) + (9 * 64 * 128 + 128);
        assert_eq!(store.num_params(), expected);
    }
}
