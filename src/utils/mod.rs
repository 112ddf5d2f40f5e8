//! Utility module
//!
//! This module provides:
//! - Configuration management
//! - Logging setup

mod config;
mod logging;

pub use config::{Config, LoggingConfig, ModelParams, DEFAULT_EMBEDDING_SIZE, DEFAULT_LSTM_SIZE};
pub use logging::setup_logging;
