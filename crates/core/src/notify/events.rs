//! Notification payloads.

use serde::{Deserialize, Serialize};

use crate::generator::GenerationError;
use crate::job::{BatchProgress, BatchStatus, ContentType, Job, JobState};

/// A terminal transition observed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A job reached Succeeded, Failed or Cancelled.
    JobFinished {
        job_id: String,
        batch_id: String,
        content_type: ContentType,
        chapter_ref: String,
        final_state: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<GenerationError>,
    },

    /// Every member of a batch is terminal.
    BatchFinished {
        batch_id: String,
        final_status: BatchStatus,
        progress: BatchProgress,
    },
}

impl Notification {
    /// Build a job notification from a terminal job snapshot.
    pub fn job_finished(job: &Job) -> Self {
        Notification::JobFinished {
            job_id: job.id.clone(),
            batch_id: job.batch_id.clone(),
            content_type: job.content_type,
            chapter_ref: job.chapter_ref.clone(),
            final_state: job.state,
            artifact_ref: job.artifact_ref().map(str::to_string),
            error: job.last_error.clone(),
        }
    }

    /// Id of the job or batch the notification is about.
    pub fn subject_id(&self) -> &str {
        match self {
            Notification::JobFinished { job_id, .. } => job_id,
            Notification::BatchFinished { batch_id, .. } => batch_id,
        }
    }

    /// Returns the notification type as a string.
    pub fn notification_type(&self) -> &'static str {
        match self {
            Notification::JobFinished { .. } => "job_finished",
            Notification::BatchFinished { .. } => "batch_finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRequest;

    #[test]
    fn test_job_finished_serialization() {
        let mut job = Job::from_request(JobRequest::audio("ch1"), "b-1", 0);
        job.state = JobState::Failed;
        job.last_error = Some(GenerationError::rate_limited("slow down"));

        let notification = Notification::job_finished(&job);
        assert_eq!(notification.subject_id(), job.id);

        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"type\":\"job_finished\""));
        assert!(json.contains("\"final_state\":\"failed\""));
        assert!(json.contains("rate_limited"));
        assert!(!json.contains("artifact_ref"));
    }
}
