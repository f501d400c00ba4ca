//! Error types for generator adapters.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactError;

/// Classification of a generation failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    /// Provider throttled the request.
    RateLimited,
    /// The request itself is unusable; retrying cannot help.
    InvalidInput,
    /// Provider down or unreachable.
    ProviderUnavailable,
    /// Attempt exceeded its time budget.
    Timeout,
    /// Anything else. Not retried.
    Unknown,
}

impl GenerationErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationErrorKind::RateLimited
                | GenerationErrorKind::ProviderUnavailable
                | GenerationErrorKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::RateLimited => "rate_limited",
            GenerationErrorKind::InvalidInput => "invalid_input",
            GenerationErrorKind::ProviderUnavailable => "provider_unavailable",
            GenerationErrorKind::Timeout => "timeout",
            GenerationErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a generator adapter.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::RateLimited, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::InvalidInput, message)
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::ProviderUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Unknown, message)
    }

    /// Returns true if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<ArtifactError> for GenerationError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound { .. } | ArtifactError::InvalidHash { .. } => {
                GenerationError::invalid_input(err.to_string())
            }
            other => GenerationError::unknown(format!("artifact store: {}", other)),
        }
    }
}
