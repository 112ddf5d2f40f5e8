//! Configuration management
//!
//! Model options mirror the keys of the array-level training configuration:
//! telescope geometry per type, auxiliary input groups, the CNN block name and
//! an optional path to pretrained weights.

use crate::data::TelescopeLayout;
use crate::error::{ModelError, Result as ModelResult};
use crate::model::CnnBlockKind;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default width of the per-telescope image embedding
pub const DEFAULT_EMBEDDING_SIZE: usize = 1024;

/// Default number of LSTM units in the array-level aggregator
pub const DEFAULT_LSTM_SIZE: usize = 2048;

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Telescope types fed to the model (exactly one is supported)
    pub processed_telescope_types: Vec<String>,
    /// Image shape (width, length, depth) per telescope type
    pub processed_image_shapes: BTreeMap<String, [usize; 3]>,
    /// Number of telescopes per telescope type
    pub processed_num_telescopes: BTreeMap<String, usize>,
    /// Auxiliary feature counts per feature group, summed into one width
    pub processed_aux_input_nums: BTreeMap<String, usize>,
    /// Number of output classes
    pub num_classes: usize,
    /// Name of the convolutional block
    pub cnn_block: String,
    /// Checkpoint used to initialise the convolutional block
    pub pretrained_weights: Option<PathBuf>,
    /// Units of the per-telescope embedding projection
    pub embedding_size: usize,
    /// Units of the recurrent cell
    pub lstm_size: usize,
    /// Zero embeddings of telescopes that did not trigger before aggregation
    pub zero_untriggered_embeddings: bool,
    /// Seed for parameter initialisation
    pub seed: Option<u64>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::single_type("MSTS", [120, 120, 1], 25, 3, 2)
    }
}

impl ModelParams {
    /// Configuration for a single homogeneous telescope type
    pub fn single_type(
        telescope_type: &str,
        image_shape: [usize; 3],
        num_telescopes: usize,
        num_aux_features: usize,
        num_classes: usize,
    ) -> Self {
        let mut processed_image_shapes = BTreeMap::new();
        processed_image_shapes.insert(telescope_type.to_string(), image_shape);

        let mut processed_num_telescopes = BTreeMap::new();
        processed_num_telescopes.insert(telescope_type.to_string(), num_telescopes);

        let mut processed_aux_input_nums = BTreeMap::new();
        processed_aux_input_nums.insert("telescope_position".to_string(), num_aux_features);

        Self {
            processed_telescope_types: vec![telescope_type.to_string()],
            processed_image_shapes,
            processed_num_telescopes,
            processed_aux_input_nums,
            num_classes,
            cnn_block: "basic".to_string(),
            pretrained_weights: None,
            embedding_size: DEFAULT_EMBEDDING_SIZE,
            lstm_size: DEFAULT_LSTM_SIZE,
            zero_untriggered_embeddings: false,
            seed: None,
        }
    }

    /// Sets the CNN block name
    pub fn with_cnn_block(mut self, name: &str) -> Self {
        self.cnn_block = name.to_string();
        self
    }

    /// Sets the checkpoint used for the convolutional block
    pub fn with_pretrained_weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.pretrained_weights = Some(path.into());
        self
    }

    /// Sets the embedding width
    pub fn with_embedding_size(mut self, size: usize) -> Self {
        self.embedding_size = size;
        self
    }

    /// Sets the number of LSTM units
    pub fn with_lstm_size(mut self, size: usize) -> Self {
        self.lstm_size = size;
        self
    }

    /// Sets the initialisation seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enables zeroing of non-triggered telescope embeddings
    pub fn with_zeroed_untriggered(mut self, enabled: bool) -> Self {
        self.zero_untriggered_embeddings = enabled;
        self
    }

    /// Total width of the per-telescope auxiliary input
    pub fn num_aux_inputs(&self) -> usize {
        self.processed_aux_input_nums.values().sum()
    }

    /// Resolves the single telescope type into a concrete layout
    pub fn telescope_layout(&self) -> ModelResult<TelescopeLayout> {
        let num_types = self.processed_telescope_types.len();
        if num_types != 1 {
            return Err(ModelError::MultipleTelescopeTypes(num_types));
        }
        let telescope_type = &self.processed_telescope_types[0];

        let [width, length, depth] = *self
            .processed_image_shapes
            .get(telescope_type)
            .ok_or_else(|| {
                ModelError::MissingConfig(format!("processed_image_shapes[{}]", telescope_type))
            })?;
        let num_telescopes = *self
            .processed_num_telescopes
            .get(telescope_type)
            .ok_or_else(|| {
                ModelError::MissingConfig(format!("processed_num_telescopes[{}]", telescope_type))
            })?;

        Ok(TelescopeLayout {
            telescope_type: telescope_type.clone(),
            num_telescopes,
            image_width: width,
            image_length: length,
            image_depth: depth,
            num_aux_inputs: self.num_aux_inputs(),
        })
    }

    /// Parses the configured CNN block name
    pub fn cnn_block_kind(&self) -> ModelResult<CnnBlockKind> {
        self.cnn_block.parse()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelParams,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from file or use default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.model.processed_telescope_types, vec!["MSTS"]);
        assert_eq!(config.model.embedding_size, 1024);
        assert_eq!(config.model.lstm_size, 2048);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.cnn_block, config.model.cnn_block);
        assert_eq!(
            parsed.model.processed_image_shapes,
            config.model.processed_image_shapes
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [model]
            cnn_block = "resnet"
            num_classes = 3
            "#,
        )
        .unwrap();
        assert_eq!(parsed.model.cnn_block, "resnet");
        assert_eq!(parsed.model.num_classes, 3);
        assert_eq!(parsed.model.lstm_size, DEFAULT_LSTM_SIZE);
    }

    #[test]
    fn test_aux_inputs_are_summed() {
        let mut params = ModelParams::single_type("LST", [4, 4, 1], 4, 3, 2);
        params
            .processed_aux_input_nums
            .insert("telescope_altitude".to_string(), 2);
        assert_eq!(params.num_aux_inputs(), 5);
    }

    #[test]
    fn test_layout_requires_single_type() {
        let mut params = ModelParams::single_type("LST", [4, 4, 1], 4, 3, 2);
        params.processed_telescope_types.push("MSTF".to_string());
        assert!(matches!(
            params.telescope_layout(),
            Err(ModelError::MultipleTelescopeTypes(2))
        ));

        params.processed_telescope_types.clear();
        assert!(matches!(
            params.telescope_layout(),
            Err(ModelError::MultipleTelescopeTypes(0))
        ));
    }

    #[test]
    fn test_layout_missing_shape() {
        let mut params = ModelParams::single_type("LST", [4, 4, 1], 4, 3, 2);
        params.processed_image_shapes.clear();
        assert!(matches!(
            params.telescope_layout(),
            Err(ModelError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_layout_resolution() {
        let params = ModelParams::single_type("LST", [8, 6, 2], 4, 3, 2);
        let layout = params.telescope_layout().unwrap();
        assert_eq!(layout.num_telescopes, 4);
        assert_eq!(layout.image_width, 8);
        assert_eq!(layout.image_length, 6);
        assert_eq!(layout.image_depth, 2);
        assert_eq!(layout.num_aux_inputs, 3);
    }
}
