//! Data module
//!
//! Feature/label bundles and their reshaping into per-telescope tensors.

mod inputs;

pub use inputs::{
    normalize_inputs, EventBatch, FeatureBatch, LabelBatch, ModelInputs, TelescopeLayout,
};
