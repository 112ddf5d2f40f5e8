//! Model module
//!
//! This module contains:
//! - The named parameter store shared by every layer
//! - Dense, convolution and normalisation layers
//! - The catalog of convolutional blocks
//! - The per-telescope embedder, trigger counting and recurrent aggregator
//! - The assembled CNN-RNN classifier

pub mod blocks;
pub mod cnn_rnn;
pub mod embedding;
pub mod layers;
pub mod params;
pub mod rnn;
pub mod selector;
pub mod triggers;

pub use blocks::{CnnBlockKind, ConvBlock};
pub use cnn_rnn::{cnn_rnn_model, CnnRnnModel, ModelOutput};
pub use embedding::{TelescopeEmbedder, CNN_BLOCK_SCOPE, NETWORK_HEAD_SCOPE};
pub use params::{Initializer, ParamStore};
pub use rnn::{dynamic_rnn, AttentionLstm, LayerNormLstmCell};
pub use selector::gather_last_valid;
pub use triggers::valid_lengths;
