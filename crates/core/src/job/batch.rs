//! Batch records and aggregate status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Job, JobState};

/// A group of jobs submitted together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: String,
    /// Member jobs in submission order.
    pub job_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(job_ids: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_ids,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate status of a batch, derived from its members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// At least one member is not terminal.
    InProgress,
    /// Every member succeeded.
    Succeeded,
    /// Every member is terminal and at least one failed.
    Failed,
    /// Every member is terminal, none failed, at least one was cancelled.
    Cancelled,
}

impl BatchStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, BatchStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

/// Member counts per state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchProgress {
    /// Count member states.
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = JobState>,
    {
        let mut progress = Self::default();
        for state in states {
            progress.total += 1;
            match state {
                JobState::Pending => progress.pending += 1,
                JobState::Ready => progress.ready += 1,
                JobState::Running => progress.running += 1,
                JobState::Succeeded => progress.succeeded += 1,
                JobState::Failed => progress.failed += 1,
                JobState::Cancelled => progress.cancelled += 1,
            }
        }
        progress
    }

    /// Number of members in a terminal state.
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Derive the aggregate status.
    pub fn status(&self) -> BatchStatus {
        if self.terminal() < self.total {
            BatchStatus::InProgress
        } else if self.failed > 0 {
            BatchStatus::Failed
        } else if self.cancelled > 0 {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Succeeded
        }
    }
}

/// Point-in-time view of a batch and its members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub progress: BatchProgress,
    /// Member snapshots in submission order.
    pub jobs: Vec<Job>,
}

impl BatchSnapshot {
    pub fn new(batch: &Batch, jobs: Vec<Job>) -> Self {
        let progress = BatchProgress::from_states(jobs.iter().map(|j| j.state));
        Self {
            id: batch.id.clone(),
            created_at: batch.created_at,
            status: progress.status(),
            progress,
            jobs,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_while_any_member_open() {
        let progress =
            BatchProgress::from_states([JobState::Succeeded, JobState::Failed, JobState::Pending]);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.terminal(), 2);
        assert_eq!(progress.status(), BatchStatus::InProgress);
    }

    #[test]
    fn test_failed_wins_over_cancelled() {
        let progress = BatchProgress::from_states([
            JobState::Succeeded,
            JobState::Failed,
            JobState::Cancelled,
        ]);
        assert_eq!(progress.status(), BatchStatus::Failed);
    }

    #[test]
    fn test_cancelled_without_failures() {
        let progress = BatchProgress::from_states([JobState::Succeeded, JobState::Cancelled]);
        assert_eq!(progress.status(), BatchStatus::Cancelled);
    }

    #[test]
    fn test_all_succeeded() {
        let progress = BatchProgress::from_states([JobState::Succeeded; 4]);
        assert_eq!(progress.status(), BatchStatus::Succeeded);
        assert!(progress.status().is_finished());
    }
}
