//! AlexNet-style block
//!
//! Five convolutions with large early receptive fields and three max-pools.
//! Local response normalisation is left out.

use super::{CnnBlockKind, ConvBlock};
use crate::error::Result;
use crate::model::layers::{max_pool2d, Activation, Conv2d, Padding};
use crate::model::params::{scoped, ParamStore};
use ndarray::Array4;

#[derive(Debug, Clone)]
pub struct AlexNetBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    conv4: Conv2d,
    conv5: Conv2d,
}

impl AlexNetBlock {
    pub fn new(scope: &str, in_channels: usize) -> Self {
        let conv = |name: &str, input: usize, filters: usize, kernel: usize| {
            Conv2d::new(scoped(scope, name), input, filters, kernel).with_activation(Activation::Relu)
        };
        Self {
            conv1: conv("conv1", in_channels, 96, 11).with_stride(4),
            conv2: conv("conv2", 96, 256, 5),
            conv3: conv("conv3", 256, 384, 3),
            conv4: conv("conv4", 384, 384, 3),
            conv5: conv("conv5", 384, 256, 3),
        }
    }

    fn convs(&self) -> [&Conv2d; 5] {
        [&self.conv1, &self.conv2, &self.conv3, &self.conv4, &self.conv5]
    }
}

impl ConvBlock for AlexNetBlock {
    fn kind(&self) -> CnnBlockKind {
        CnnBlockKind::AlexNet
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        for conv in self.convs() {
            conv.build(store)?;
        }
        Ok(())
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, _is_training: bool) -> Result<Array4<f32>> {
        let out = self.conv1.forward(store, x)?;
        let out = max_pool2d(&out, 3, 2, Padding::Same)?;

        let out = self.conv2.forward(store, &out)?;
        let out = max_pool2d(&out, 3, 2, Padding::Same)?;

        let out = self.conv3.forward(store, &out)?;
        let out = self.conv4.forward(store, &out)?;
        let out = self.conv5.forward(store, &out)?;
        max_pool2d(&out, 3, 2, Padding::Same)
    }
}
