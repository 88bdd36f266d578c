//! Error types for the vocoder crates.

use std::path::PathBuf;

use mlx_rs::error::Exception;
use thiserror::Error;

/// Result type for vocoder operations.
pub type Result<T> = std::result::Result<T, VocoderError>;

/// Error type for vocoder operations.
#[derive(Error, Debug)]
pub enum VocoderError {
    /// MLX operation error.
    #[error("MLX error: {0}")]
    Mlx(#[from] Exception),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio (or precomputed mel) file could not be decoded.
    #[error("Failed to decode {path}: {message}")]
    AudioDecode {
        /// File that failed.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// Shape mismatch error.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<i32>,
        /// Actual shape.
        actual: Vec<i32>,
    },

    /// Malformed discriminator configuration entry.
    #[error("Discriminator configuration error: {0}")]
    DiscriminatorConfig(String),

    /// Every retry of a recoverable operation failed.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
        /// Error from the last attempt.
        #[source]
        source: Box<VocoderError>,
    },

    /// Weight loading error.
    #[error("Weight loading error: {0}")]
    WeightLoad(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VocoderError {
    /// Build an [`VocoderError::AudioDecode`] from any displayable cause.
    pub fn decode(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::AudioDecode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error is an audio decode failure, directly or after retries.
    pub fn is_decode(&self) -> bool {
        match self {
            Self::AudioDecode { .. } => true,
            Self::RetriesExhausted { source, .. } => source.is_decode(),
            _ => false,
        }
    }
}
