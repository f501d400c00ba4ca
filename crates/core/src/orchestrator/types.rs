//! Types for the job orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{ContentType, JobState};

/// Errors returned by orchestrator operations.
///
/// Generation failures never surface here; they are recorded on the job.
#[derive(Debug, Error, PartialEq)]
pub enum OrchestratorError {
    /// Submission rejected; nothing was created.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Batch not found.
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// Operation not allowed in the current state.
    #[error("cannot {operation} {id}: {reason}")]
    InvalidState {
        id: String,
        operation: String,
        reason: String,
    },

    /// The orchestrator has not been started or was shut down.
    #[error("orchestrator is not running")]
    NotRunning,

    /// No adapter registered for a requested content type.
    #[error("no generator adapter registered for {0}")]
    NoAdapter(ContentType),
}

impl OrchestratorError {
    pub(crate) fn invalid_state(
        id: impl Into<String>,
        operation: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn wrong_state(id: impl Into<String>, operation: &str, state: JobState) -> Self {
        Self::invalid_state(id, operation, format!("job is {}", state))
    }
}

/// Slot pool view for one capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatus {
    pub content_type: ContentType,
    /// Occupied slots (includes cancelled jobs whose adapter call has not returned).
    pub active: usize,
    /// Slot limit.
    pub max: usize,
    /// Ready jobs waiting for a slot.
    pub queued: usize,
    /// Ready jobs sitting out a retry backoff.
    pub backing_off: usize,
    /// Jobs of this type that succeeded since start.
    pub total_succeeded: u64,
    /// Jobs of this type that failed since start.
    pub total_failed: u64,
}

impl PoolStatus {
    pub fn available(&self) -> usize {
        self.max.saturating_sub(self.active)
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorStatus {
    /// Whether the scheduler is running.
    pub running: bool,
    /// Jobs held in memory.
    pub jobs: usize,
    /// Batches held in memory.
    pub batches: usize,
    /// Batches with at least one non-terminal member.
    pub batches_in_progress: usize,
    pub pools: Vec<PoolStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::wrong_state("job-1", "retry", JobState::Running);
        assert_eq!(err.to_string(), "cannot retry job-1: job is running");
        assert_eq!(
            OrchestratorError::NoAdapter(ContentType::Video).to_string(),
            "no generator adapter registered for video"
        );
    }

    #[test]
    fn test_pool_available() {
        let pool = PoolStatus {
            content_type: ContentType::Audio,
            active: 3,
            max: 4,
            queued: 0,
            backing_off: 0,
            total_succeeded: 0,
            total_failed: 0,
        };
        assert_eq!(pool.available(), 1);
    }
}
