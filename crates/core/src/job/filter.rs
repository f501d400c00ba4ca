//! Job listing filter.

use serde::{Deserialize, Serialize};

use super::types::{ContentType, Job, JobState};

/// Filter for listing jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFilter {
    /// Filter by batch.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Filter by chapter.
    #[serde(default)]
    pub chapter_ref: Option<String>,
    /// Filter by content type.
    #[serde(default)]
    pub content_type: Option<ContentType>,
    /// Filter by state.
    #[serde(default)]
    pub state: Option<JobState>,
    /// Maximum number of results.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            batch_id: None,
            chapter_ref: None,
            content_type: None,
            state: None,
            limit: default_limit(),
            offset: 0,
        }
    }

    /// Filter by batch.
    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Filter by chapter.
    pub fn with_chapter(mut self, chapter_ref: impl Into<String>) -> Self {
        self.chapter_ref = Some(chapter_ref.into());
        self
    }

    /// Filter by content type.
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Filter by state.
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns true if the job passes every set criterion. Pagination is not applied here.
    pub fn matches(&self, job: &Job) -> bool {
        self.batch_id.as_deref().map_or(true, |b| job.batch_id == b)
            && self
                .chapter_ref
                .as_deref()
                .map_or(true, |c| job.chapter_ref == c)
            && self.content_type.map_or(true, |t| job.content_type == t)
            && self.state.map_or(true, |s| job.state == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRequest;

    #[test]
    fn test_defaults() {
        let filter = JobFilter::new();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset, 0);
        assert!(filter.state.is_none());
    }

    #[test]
    fn test_matches() {
        let job = Job::from_request(JobRequest::audio("ch1"), "b-1", 0);

        assert!(JobFilter::new().matches(&job));
        assert!(JobFilter::new().with_chapter("ch1").matches(&job));
        assert!(!JobFilter::new().with_chapter("ch2").matches(&job));
        assert!(JobFilter::new()
            .with_batch("b-1")
            .with_content_type(ContentType::Audio)
            .with_state(JobState::Pending)
            .matches(&job));
        assert!(!JobFilter::new()
            .with_content_type(ContentType::Video)
            .matches(&job));
        assert!(!JobFilter::new().with_state(JobState::Running).matches(&job));
    }
}
