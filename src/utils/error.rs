//! Error Handling Module
//!
//! Defines the error taxonomy for the defect triage library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for defect triage operations
#[derive(Error, Debug)]
pub enum TriageError {
    /// Bad data layout or hyperparameters, detected before any work starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint or class list missing at load time
    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    /// Bytes that do not decode as an image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A training sample that failed to decode
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Checkpoint does not fit the architecture rebuilt for it
    #[error("Architecture mismatch: {0}")]
    ArchitectureMismatch(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TriageError {
    /// True for failures caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, TriageError::InvalidImage(_))
    }
}

/// Convenience Result type for defect triage operations
pub type Result<T> = std::result::Result<T, TriageError>;
