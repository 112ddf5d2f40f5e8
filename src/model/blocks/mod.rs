//! Convolutional feature extractors
//!
//! Interchangeable blocks that turn one telescope image batch
//! [batch, width, length, depth] into a feature map. The model picks one by
//! name from configuration.

mod alexnet;
mod basic;
mod densenet;
mod mobilenet;
mod resnet;

pub use alexnet::AlexNetBlock;
pub use basic::BasicConvBlock;
pub use densenet::DenseNetBlock;
pub use mobilenet::MobileNetBlock;
pub use resnet::ResNetBlock;

use super::params::ParamStore;
use crate::error::{ModelError, Result};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog of available CNN blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CnnBlockKind {
    Basic,
    AlexNet,
    MobileNet,
    ResNet,
    DenseNet,
}

impl CnnBlockKind {
    pub const ALL: [CnnBlockKind; 5] = [
        CnnBlockKind::Basic,
        CnnBlockKind::AlexNet,
        CnnBlockKind::MobileNet,
        CnnBlockKind::ResNet,
        CnnBlockKind::DenseNet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CnnBlockKind::Basic => "basic",
            CnnBlockKind::AlexNet => "alexnet",
            CnnBlockKind::MobileNet => "mobilenet",
            CnnBlockKind::ResNet => "resnet",
            CnnBlockKind::DenseNet => "densenet",
        }
    }

    /// Creates the block under `scope` for images with `in_channels` channels
    pub fn create(&self, scope: &str, in_channels: usize) -> Box<dyn ConvBlock> {
        match self {
            CnnBlockKind::Basic => Box::new(BasicConvBlock::new(scope, in_channels)),
            CnnBlockKind::AlexNet => Box::new(AlexNetBlock::new(scope, in_channels)),
            CnnBlockKind::MobileNet => Box::new(MobileNetBlock::new(scope, in_channels)),
            CnnBlockKind::ResNet => Box::new(ResNetBlock::new(scope, in_channels)),
            CnnBlockKind::DenseNet => Box::new(DenseNetBlock::new(scope, in_channels)),
        }
    }
}

impl FromStr for CnnBlockKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        CnnBlockKind::ALL
            .iter()
            .find(|kind| kind.name() == s)
            .copied()
            .ok_or_else(|| ModelError::InvalidCnnBlock(s.to_string()))
    }
}

impl fmt::Display for CnnBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A convolutional feature extractor whose weights live in a [`ParamStore`]
pub trait ConvBlock: fmt::Debug {
    fn kind(&self) -> CnnBlockKind;

    /// Registers the block's parameters; reuses them when already present
    fn build(&self, store: &mut ParamStore) -> Result<()>;

    /// Input: [batch, width, length, depth], output: [batch, h, w, channels]
    fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>>;
}
