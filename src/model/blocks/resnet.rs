//! ResNet-style block with basic residual units

use super::{CnnBlockKind, ConvBlock};
use crate::error::Result;
use crate::model::layers::{global_avg_pool, max_pool2d, relu, BatchNorm, Conv2d, Padding};
use crate::model::params::{scoped, ParamStore};
use ndarray::Array4;

const STEM_FILTERS: usize = 64;

/// (filters, stride) per residual unit
const STAGES: [(usize, usize); 4] = [(64, 1), (128, 2), (256, 2), (512, 2)];

/// Basic residual unit with two 3x3 convolutions
#[derive(Debug, Clone)]
struct ResidualUnit {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    /// Projection for the skip connection when the shape changes
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl ResidualUnit {
    fn new(scope: &str, in_channels: usize, out_channels: usize, stride: usize) -> Self {
        let downsample = if stride != 1 || in_channels != out_channels {
            Some((
                Conv2d::new(scoped(scope, "shortcut"), in_channels, out_channels, 1)
                    .with_stride(stride)
                    .without_bias(),
                BatchNorm::new(scoped(scope, "shortcut_bn"), out_channels),
            ))
        } else {
            None
        };

        Self {
            conv1: Conv2d::new(scoped(scope, "conv1"), in_channels, out_channels, 3)
                .with_stride(stride)
                .without_bias(),
            bn1: BatchNorm::new(scoped(scope, "bn1"), out_channels),
            conv2: Conv2d::new(scoped(scope, "conv2"), out_channels, out_channels, 3).without_bias(),
            bn2: BatchNorm::new(scoped(scope, "bn2"), out_channels),
            downsample,
        }
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        self.conv1.build(store)?;
        self.bn1.build(store)?;
        self.conv2.build(store)?;
        self.bn2.build(store)?;
        if let Some((conv, bn)) = &self.downsample {
            conv.build(store)?;
            bn.build(store)?;
        }
        Ok(())
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let out = self.conv1.forward(store, x)?;
        let out = relu(&self.bn1.forward(store, &out, is_training)?);
        let out = self.conv2.forward(store, &out)?;
        let out = self.bn2.forward(store, &out, is_training)?;

        let identity = match &self.downsample {
            Some((conv, bn)) => bn.forward(store, &conv.forward(store, x)?, is_training)?,
            None => x.clone(),
        };

        Ok(relu(&(out + &identity)))
    }
}

#[derive(Debug, Clone)]
pub struct ResNetBlock {
    stem: Conv2d,
    stem_bn: BatchNorm,
    units: Vec<ResidualUnit>,
}

impl ResNetBlock {
    pub fn new(scope: &str, in_channels: usize) -> Self {
        let stem = Conv2d::new(scoped(scope, "conv1"), in_channels, STEM_FILTERS, 7)
            .with_stride(2)
            .without_bias();
        let stem_bn = BatchNorm::new(scoped(scope, "conv1_bn"), STEM_FILTERS);

        let mut units = Vec::with_capacity(STAGES.len());
        let mut channels = STEM_FILTERS;
        for (i, &(filters, stride)) in STAGES.iter().enumerate() {
            let unit_scope = scoped(scope, &format!("unit{}", i + 1));
            units.push(ResidualUnit::new(&unit_scope, channels, filters, stride));
            channels = filters;
        }

        Self { stem, stem_bn, units }
    }
}

impl ConvBlock for ResNetBlock {
    fn kind(&self) -> CnnBlockKind {
        CnnBlockKind::ResNet
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        self.stem.build(store)?;
        self.stem_bn.build(store)?;
        for unit in &self.units {
            unit.build(store)?;
        }
        Ok(())
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let out = self.stem.forward(store, x)?;
        let out = relu(&self.stem_bn.forward(store, &out, is_training)?);
        let mut out = max_pool2d(&out, 3, 2, Padding::Same)?;
        for unit in &self.units {
            out = unit.forward(store, &out, is_training)?;
        }
        Ok(global_avg_pool(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residual_unit_identity_path() {
        let mut store = ParamStore::new(Some(0));
        let unit = ResidualUnit::new("unit", 8, 8, 1);
        assert!(unit.downsample.is_none());
        unit.build(&mut store).unwrap();

        let output = unit.forward(&store, &Array4::ones((1, 4, 4, 8)), false).unwrap();
        assert_eq!(output.shape(), &[1, 4, 4, 8]);
        assert!(output.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_residual_unit_projection() {
        let mut store = ParamStore::new(Some(0));
        let unit = ResidualUnit::new("unit", 8, 16, 2);
        assert!(unit.downsample.is_some());
        unit.build(&mut store).unwrap();

        let output = unit.forward(&store, &Array4::ones((1, 4, 4, 8)), true).unwrap();
        assert_eq!(output.shape(), &[1, 2, 2, 16]);
    }

    #[test]
    fn test_resnet_output_shape() {
        let mut store = ParamStore::new(Some(0));
        let block = ResNetBlock::new("cnn_block", 1);
        block.build(&mut store).unwrap();

        let output = block.forward(&store, &Array4::ones((1, 8, 8, 1)), false).unwrap();
        assert_eq!(output.shape(), &[1, 1, 1, 512]);
    }
}
