//! MobileNet-style block built from depthwise separable convolutions
//!
//! Each unit applies a depthwise 3×3 filter per channel followed by a
//! pointwise 1×1 convolution that mixes channels, both with batch norm and
//! ReLU.

use super::{CnnBlockKind, ConvBlock};
use crate::error::Result;
use crate::model::layers::{global_avg_pool, relu, BatchNorm, Conv2d, DepthwiseConv2d};
use crate::model::params::{scoped, ParamStore};
use ndarray::Array4;

/// Stem filters
const STEM_FILTERS: usize = 32;

/// (pointwise filters, depthwise stride) per separable unit
const UNITS: [(usize, usize); 6] = [(64, 1), (128, 2), (128, 1), (256, 2), (256, 1), (512, 2)];

#[derive(Debug, Clone)]
struct SeparableUnit {
    depthwise: DepthwiseConv2d,
    depthwise_bn: BatchNorm,
    pointwise: Conv2d,
    pointwise_bn: BatchNorm,
}

impl SeparableUnit {
    fn new(scope: &str, in_channels: usize, filters: usize, stride: usize) -> Self {
        Self {
            depthwise: DepthwiseConv2d::new(scoped(scope, "depthwise"), in_channels, 3, stride),
            depthwise_bn: BatchNorm::new(scoped(scope, "depthwise_bn"), in_channels),
            pointwise: Conv2d::new(scoped(scope, "pointwise"), in_channels, filters, 1).without_bias(),
            pointwise_bn: BatchNorm::new(scoped(scope, "pointwise_bn"), filters),
        }
    }

    fn build(&self, store: &mut ParamStore) -> Result<()> {
        self.depthwise.build(store)?;
        self.depthwise_bn.build(store)?;
        self.pointwise.build(store)?;
        self.pointwise_bn.build(store)
    }

    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let out = self.depthwise.forward(store, x)?;
        let out = relu(&self.depthwise_bn.forward(store, &out, is_training)?);
        let out = self.pointwise.forward(store, &out)?;
        Ok(relu(&self.pointwise_bn.forward(store, &out, is_training)?))
    }
}

#[derive(Debug, Clone)]
pub struct MobileNetBlock {
    stem: Conv2d,
    stem_bn: BatchNorm,
    units: Vec<SeparableUnit>,
}

impl MobileNetBlock {
    pub fn new(scope: &str, in_channels: usize) -> Self {
        let stem = Conv2d::new(scoped(scope, "conv1"), in_channels, STEM_FILTERS, 3)
            .with_stride(2)
            .without_bias();
        let stem_bn = BatchNorm::new(scoped(scope, "conv1_bn"), STEM_FILTERS);

        let mut units = Vec::with_capacity(UNITS.len());
        let mut channels = STEM_FILTERS;
        for (i, &(filters, stride)) in UNITS.iter().enumerate() {
            let unit_scope = scoped(scope, &format!("separable{}", i + 1));
            units.push(SeparableUnit::new(&unit_scope, channels, filters, stride));
            channels = filters;
        }

        Self { stem, stem_bn, units }
    }
}

impl ConvBlock for MobileNetBlock {
    fn kind(&self) -> CnnBlockKind {
        CnnBlockKind::MobileNet
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
        let mut out = relu(&self.stem_bn.forward(store, &out, is_training)?);
        for unit in &self.units {
            out = unit.forward(store, &out, is_training)?;
        }
        Ok(global_avg_pool(&out))
    }
}
