//! DenseNet-style block
//!
//! Every layer of a dense block receives the concatenated feature maps of all
//! preceding layers. Transition layers between blocks compress channels and
//! halve the spatial size.

use super::{CnnBlockKind, ConvBlock};
use crate::error::Result;
use crate::model::layers::{avg_pool2d, global_avg_pool, relu, BatchNorm, Conv2d, Padding};
use crate::model::params::{scoped, ParamStore};
use ndarray::{concatenate, Array4, Axis};

const GROWTH_RATE: usize = 32;
const LAYERS_PER_BLOCK: usize = 4;
const NUM_BLOCKS: usize = 3;
const BOTTLENECK_FACTOR: usize = 4;
const COMPRESSION: f64 = 0.5;

/// BN → ReLU → 1x1 conv → BN → ReLU → 3x3 conv
#[derive(Debug, Clone)]
struct DenseLayer {
    bn1: BatchNorm,
    bottleneck: Conv2d,
    bn2: BatchNorm,
    conv: Conv2d,
}

impl DenseLayer {
    fn new(scope: &str, in_channels: usize) -> Self {
        let bottleneck_channels = BOTTLENECK_FACTOR * GROWTH_RATE;
        Self {
            bn1: BatchNorm::new(scoped(scope, "bn1"), in_channels),
            bottleneck: Conv2d::new(scoped(scope, "conv1"), in_channels, bottleneck_channels, 1)
                .without_bias(),
            bn2: BatchNorm::new(scoped(scope, "bn2"), bottleneck_channels),
            conv: Conv2d::new(scoped(scope, "conv2"), bottleneck_channels, GROWTH_RATE, 3)
                .without_bias(),
        }
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        self.bn1.build(store)?;
        self.bottleneck.build(store)?;
        self.bn2.build(store)?;
        self.conv.build(store)
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let out = relu(&self.bn1.forward(store, x, is_training)?);
        let out = self.bottleneck.forward(store, &out)?;
        let out = relu(&self.bn2.forward(store, &out, is_training)?);
        self.conv.forward(store, &out)
    }
}

/// BN → ReLU → 1x1 conv → 2x2 average pool
#[derive(Debug, Clone)]
struct Transition {
    bn: BatchNorm,
    conv: Conv2d,
}

impl Transition {
    fn new(scope: &str, in_channels: usize, out_channels: usize) -> Self {
        Self {
            bn: BatchNorm::new(scoped(scope, "bn"), in_channels),
            conv: Conv2d::new(scoped(scope, "conv"), in_channels, out_channels, 1).without_bias(),
        }
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        self.bn.build(store)?;
        self.conv.build(store)
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let out = relu(&self.bn.forward(store, x, is_training)?);
        let out = self.conv.forward(store, &out)?;
        avg_pool2d(&out, 2, 2, Padding::Same)
    }
}

#[derive(Debug, Clone)]
pub struct DenseNetBlock {
    stem: Conv2d,
    blocks: Vec<Vec<DenseLayer>>,
    transitions: Vec<Transition>,
    final_bn: BatchNorm,
}

impl DenseNetBlock {
    pub fn new(scope: &str, in_channels: usize) -> Self {
        let mut channels = 2 * GROWTH_RATE;
        let stem = Conv2d::new(scoped(scope, "conv0"), in_channels, channels, 3).without_bias();

        let mut blocks = Vec::with_capacity(NUM_BLOCKS);
        let mut transitions = Vec::with_capacity(NUM_BLOCKS - 1);
        for block_idx in 0..NUM_BLOCKS {
            let mut layers = Vec::with_capacity(LAYERS_PER_BLOCK);
            for layer_idx in 0..LAYERS_PER_BLOCK {
                let layer_scope = scoped(
                    scope,
                    &format!("dense_block{}/layer{}", block_idx + 1, layer_idx + 1),
                );
                layers.push(DenseLayer::new(&layer_scope, channels));
                channels += GROWTH_RATE;
            }
            blocks.push(layers);

            if block_idx + 1 < NUM_BLOCKS {
                let compressed = ((channels as f64) * COMPRESSION).floor() as usize;
                let transition_scope = scoped(scope, &format!("transition{}", block_idx + 1));
                transitions.push(Transition::new(&transition_scope, channels, compressed));
                channels = compressed;
            }
        }

        let final_bn = BatchNorm::new(scoped(scope, "final_bn"), channels);

        Self {
            stem,
            blocks,
            transitions,
            final_bn,
        }
    }

    /// Channels of the feature map produced by `forward`
    pub fn output_channels(&self) -> usize {
        self.final_bn.num_features
    }
}

impl ConvBlock for DenseNetBlock {
    fn kind(&self) -> CnnBlockKind {
        CnnBlockKind::DenseNet
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        self.stem.build(store)?;
        for layer in self.blocks.iter().flatten() {
            layer.build(store)?;
        }
        for transition in &self.transitions {
            transition.build(store)?;
        }
        self.final_bn.build(store)
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let mut out = self.stem.forward(store, x)?;
        for (block_idx, layers) in self.blocks.iter().enumerate() {
            for layer in layers {
                let new_features = layer.forward(store, &out, is_training)?;
                out = concatenate(Axis(3), &[out.view(), new_features.view()])?;
            }
            if let Some(transition) = self.transitions.get(block_idx) {
                out = transition.forward(store, &out, is_training)?;
            }
        }
        let out = relu(&self.final_bn.forward(store, &out, is_training)?);
        Ok(global_avg_pool(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_growth() {
        let block = DenseNetBlock::new("cnn_block", 1);
        // 64 + 4*32 = 192 -> 96 + 128 = 224 -> 112 + 128 = 240
        assert_eq!(block.output_channels(), 240);
    }

    #[test]
    fn test_dense_layer_concatenation() {
        let mut store = ParamStore::new(Some(0));
        let block = DenseNetBlock::new("cnn_block", 2);
        block.build(&mut store).unwrap();

        let output = block.forward(&store, &Array4::ones((2, 4, 4, 2)), true).unwrap();
        assert_eq!(output.shape(), &[2, 1, 1, 240]);
    }
}
