//! Input reshaping
//!
//! Turns flattened feature/label buffers into the per-telescope layouts used by
//! the model. No values are altered, only shapes and axis order.

use crate::error::{ModelError, Result};
use ndarray::{Array1, Array2, Array3, Array5};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Geometry of the single telescope type processed by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelescopeLayout {
    pub telescope_type: String,
    pub num_telescopes: usize,
    pub image_width: usize,
    pub image_length: usize,
    pub image_depth: usize,
    pub num_aux_inputs: usize,
}

impl TelescopeLayout {
    /// Image shape as (width, length, depth)
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (self.image_width, self.image_length, self.image_depth)
    }

    /// Number of pixel values per telescope image
    pub fn image_size(&self) -> usize {
        self.image_width * self.image_length * self.image_depth
    }
}

/// Flattened feature buffers as produced by the input pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBatch {
    /// Images, row-major over (batch, telescope, width, length, depth)
    pub telescope_data: Vec<f32>,
    /// Trigger flags (0.0 / 1.0), row-major over (batch, telescope)
    pub telescope_triggers: Vec<f32>,
    /// Auxiliary inputs, row-major over (batch, telescope, feature)
    pub telescope_aux_inputs: Vec<f32>,
}

/// Flattened label buffers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelBatch {
    pub gamma_hadron_label: Vec<i64>,
}

/// Features and labels read together from one JSON document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBatch {
    #[serde(flatten)]
    pub features: FeatureBatch,
    #[serde(flatten)]
    pub labels: LabelBatch,
}

impl EventBatch {
    /// Reads a batch from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Reshaped model inputs
#[derive(Debug, Clone)]
pub struct ModelInputs {
    /// Images in telescope-major order: (telescope, batch, width, length, depth)
    pub telescope_data: Array5<f32>,
    /// Trigger flags: (batch, telescope)
    pub telescope_triggers: Array2<f32>,
    /// Auxiliary inputs: (batch, telescope, feature)
    pub telescope_aux_inputs: Array3<f32>,
    /// Class ids: (batch,)
    pub gamma_hadron_labels: Array1<i64>,
}

impl ModelInputs {
    pub fn batch_size(&self) -> usize {
        self.telescope_triggers.nrows()
    }

    pub fn num_telescopes(&self) -> usize {
        self.telescope_triggers.ncols()
    }
}

/// Reshapes flattened buffers into the per-telescope layouts
///
/// The batch size is inferred from the image buffer; every other buffer must
/// agree with it.
pub fn normalize_inputs(
    features: &FeatureBatch,
    labels: &LabelBatch,
    layout: &TelescopeLayout,
) -> Result<ModelInputs> {
    let num_tel = layout.num_telescopes;
    let (width, length, depth) = layout.image_shape();
    let values_per_event = num_tel * layout.image_size();

    if values_per_event == 0 || features.telescope_data.len() % values_per_event != 0 {
        return Err(ModelError::shape_mismatch(
            "telescope_data",
            format!("a multiple of {}", values_per_event),
            features.telescope_data.len(),
        ));
    }
    let batch_size = features.telescope_data.len() / values_per_event;

    check_len("telescope_triggers", &features.telescope_triggers, batch_size * num_tel)?;
    check_len(
        "telescope_aux_inputs",
        &features.telescope_aux_inputs,
        batch_size * num_tel * layout.num_aux_inputs,
    )?;
    check_len("gamma_hadron_label", &labels.gamma_hadron_label, batch_size)?;

    let telescope_data = Array5::from_shape_vec(
        (batch_size, num_tel, width, length, depth),
        features.telescope_data.clone(),
    )?;
    // Telescope axis first so each telescope's images can be taken as one slice
    let telescope_data = telescope_data
        .permuted_axes([1, 0, 2, 3, 4])
        .as_standard_layout()
        .into_owned();

    let telescope_triggers =
        Array2::from_shape_vec((batch_size, num_tel), features.telescope_triggers.clone())?;

    let telescope_aux_inputs = Array3::from_shape_vec(
        (batch_size, num_tel, layout.num_aux_inputs),
        features.telescope_aux_inputs.clone(),
    )?;

    let gamma_hadron_labels = Array1::from_vec(labels.gamma_hadron_label.clone());

    Ok(ModelInputs {
        telescope_data,
        telescope_triggers,
        telescope_aux_inputs,
        gamma_hadron_labels,
    })
}

fn check_len<T>(name: &str, values: &[T], expected: usize) -> Result<()> {
    if values.len() != expected {
        return Err(ModelError::shape_mismatch(name, expected, values.len()));
    }
    Ok(())
}
