//! Error types for the artifact module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No artifact is stored under this hash.
    #[error("Artifact not found: {content_hash}")]
    NotFound { content_hash: String },

    /// The hash is not a SHA-256 hex digest.
    #[error("Invalid content hash: {content_hash}")]
    InvalidHash { content_hash: String },

    /// Failed to write artifact bytes.
    #[error("Failed to write artifact to {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to (de)serialize the metadata sidecar.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArtifactError {
    pub fn not_found(content_hash: impl Into<String>) -> Self {
        Self::NotFound {
            content_hash: content_hash.into(),
        }
    }
}
