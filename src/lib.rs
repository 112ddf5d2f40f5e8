//! # CNN-RNN Classifier for Telescope Arrays
//!
//! Gamma/hadron separation from the images of an array of imaging atmospheric
//! Cherenkov telescopes. A shared convolutional block embeds every telescope
//! image, an attention LSTM aggregates the embeddings of the triggered
//! telescopes, and a linear head produces class logits.
//!
//! ## Modules
//!
//! - `data`: Feature/label bundles and their reshaping into per-telescope tensors
//! - `model`: Parameter store, layers, CNN blocks, recurrent aggregator and classifier
//! - `utils`: Configuration and logging
//!
//! ## Example
//!
//! ```no_run
//! use cta_cnn_rnn::{cnn_rnn_model, FeatureBatch, LabelBatch, ModelParams, ParamStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let params = ModelParams::single_type("LST", [8, 8, 1], 4, 2, 2).with_seed(42);
//!     let mut store = ParamStore::new(params.seed);
//!
//!     let features = FeatureBatch {
//!         telescope_data: vec![0.0; 4 * 8 * 8],
//!         telescope_triggers: vec![1.0, 1.0, 0.0, 0.0],
//!         telescope_aux_inputs: vec![0.0; 4 * 2],
//!     };
//!     let labels = LabelBatch { gamma_hadron_label: vec![1] };
//!
//!     let logits = cnn_rnn_model(&features, &labels, &params, &mut store, false)?;
//!     println!("{:?}", logits);
//!     Ok(())
//! }
//! ```

pub mod data;
pub mod error;
pub mod model;
pub mod utils;

// Re-export main types for convenience
pub use data::{normalize_inputs, EventBatch, FeatureBatch, LabelBatch, ModelInputs, TelescopeLayout};
pub use error::{ModelError, Result};
pub use model::{cnn_rnn_model, CnnBlockKind, CnnRnnModel, ModelOutput, ParamStore};
pub use utils::{setup_logging, Config, ModelParams};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
