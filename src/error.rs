//! Error types shared by every layer, the network and the loaders.
//!
//! All failures are fatal for a training run; they are surfaced as typed
//! errors so callers (the binary, tests) decide what to do with them.

use thiserror::Error;

/// Errors produced while wiring, training, or persisting a network.
#[derive(Debug, Error)]
pub enum NnError {
    /// Incompatible dimensions fed into a matrix operation, a convolution,
    /// or between two layers during compilation.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Unknown option names, illegal hyperparameters, or a network that
    /// cannot be built as requested.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Dataset or checkpoint file missing, unreadable, or truncated.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

impl NnError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        NnError::ShapeMismatch(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        NnError::InvalidConfiguration(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T, E = NnError> = std::result::Result<T, E>;
