//! Storage trait for job records.

use thiserror::Error;

use crate::job::{Batch, Job, JobFilter};

/// Errors from job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Failed to (de)serialize a stored record.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Trait for job storage backends.
///
/// Writes are whole-record upserts keyed by id, so replaying the same
/// snapshot is harmless.
pub trait JobStore: Send + Sync {
    /// Insert or replace a job record.
    fn upsert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Insert or replace a batch record.
    fn upsert_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Get a job by ID.
    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Get a batch by ID.
    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError>;

    /// List jobs matching the filter, oldest first.
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Count jobs matching the filter (ignores limit/offset).
    fn count_jobs(&self, filter: &JobFilter) -> Result<usize, StoreError>;

    /// Delete a batch and all of its jobs. Returns false if the batch did not exist.
    fn delete_batch(&self, id: &str) -> Result<bool, StoreError>;
}
