//! Error types for model construction and execution

use thiserror::Error;

/// Errors raised while building or running the CNN-RNN model
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Must use a single telescope type for CNN-RNN. Number used: {0}")]
    MultipleTelescopeTypes(usize),

    #[error("Invalid CNN block specified: {0}.")]
    InvalidCnnBlock(String),

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Shape mismatch for {name}: expected {expected}, got {got}")]
    ShapeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error("Parameter not found in store: {0}")]
    MissingParameter(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ModelError {
    /// Convenience constructor for shape mismatches
    pub fn shape_mismatch(
        name: impl Into<String>,
        expected: impl std::fmt::Debug,
        got: impl std::fmt::Debug,
    ) -> Self {
        ModelError::ShapeMismatch {
            name: name.into(),
            expected: format!("{:?}", expected),
            got: format!("{:?}", got),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ModelError>;
