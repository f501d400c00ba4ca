//! Core job data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::generator::{GenerationError, InputArtifacts};

/// Opaque, provider-specific generation parameters (style, voice, resolution, ...).
pub type Params = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Content types
// ============================================================================

/// Kind of media a job produces.
///
/// Each content type is also a scheduling capability: it selects the adapter
/// pool and the slot limit a job runs under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Still image generated from chapter text.
    Illustration,
    /// Narrated speech for a chapter.
    Audio,
    /// Video composited from a finished illustration and finished audio.
    Video,
}

impl ContentType {
    /// Every content type, in dependency order.
    pub const ALL: [ContentType; 3] = [
        ContentType::Illustration,
        ContentType::Audio,
        ContentType::Video,
    ];

    /// Returns the content type as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Illustration => "illustration",
            ContentType::Audio => "audio",
            ContentType::Video => "video",
        }
    }

    /// Content types this one needs as finished inputs.
    pub fn required_inputs(&self) -> &'static [ContentType] {
        match self {
            ContentType::Video => &[ContentType::Illustration, ContentType::Audio],
            _ => &[],
        }
    }

    /// Params key used to reference a pre-existing artifact of this type.
    pub fn artifact_param_key(&self) -> &'static str {
        match self {
            ContentType::Illustration => "illustration_artifact",
            ContentType::Audio => "audio_artifact",
            ContentType::Video => "video_artifact",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "illustration" | "image" => Ok(ContentType::Illustration),
            "audio" | "speech" => Ok(ContentType::Audio),
            "video" => Ok(ContentType::Video),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

// ============================================================================
// Job state machine
// ============================================================================

/// Current lifecycle state of a job.
///
/// State machine flow:
/// ```text
/// Pending -> Ready -> Running -> Succeeded
///              ^         |
///              +---------+  (retryable error, attempts left, after backoff)
///                        |
///                        v
///                      Failed
///
/// Pending/Ready/Running can transition to Cancelled.
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for dependencies.
    Pending,
    /// Dependencies satisfied, waiting for a slot (or a retry backoff).
    Ready,
    /// Adapter call in flight.
    Running,
    /// Artifact produced (terminal).
    Succeeded,
    /// Non-retryable error or attempts exhausted (terminal).
    Failed,
    /// Cancelled by request or because an input can no longer exist (terminal).
    Cancelled,
}

impl JobState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Returns true if the job can be cancelled from this state.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the job can be re-armed from this state.
    pub fn can_retry(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Cancelled)
    }

    /// Returns the state as a string (for filtering and persistence).
    pub fn state_type(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Ready => "ready",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_type())
    }
}

/// Why a job ended up cancelled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CancelCause {
    /// The caller cancelled the job or its batch.
    Requested,
    /// A dependency reached Failed or Cancelled.
    DependencyFailed { job_id: String },
}

// ============================================================================
// Requests and records
// ============================================================================

/// One (content type, chapter) pair requested by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    /// What to generate.
    pub content_type: ContentType,
    /// Opaque identifier of the source text unit.
    pub chapter_ref: String,
    /// Provider-specific generation parameters.
    #[serde(default)]
    pub params: Params,
    /// Opt-in: reuse an existing artifact generated from identical inputs.
    #[serde(default)]
    pub reuse_artifacts: bool,
}

impl JobRequest {
    /// Create a request with empty params.
    pub fn new(content_type: ContentType, chapter_ref: impl Into<String>) -> Self {
        Self {
            content_type,
            chapter_ref: chapter_ref.into(),
            params: Params::new(),
            reuse_artifacts: false,
        }
    }

    /// Create an illustration request.
    pub fn illustration(chapter_ref: impl Into<String>) -> Self {
        Self::new(ContentType::Illustration, chapter_ref)
    }

    /// Create an audio request.
    pub fn audio(chapter_ref: impl Into<String>) -> Self {
        Self::new(ContentType::Audio, chapter_ref)
    }

    /// Create a video request.
    pub fn video(chapter_ref: impl Into<String>) -> Self {
        Self::new(ContentType::Video, chapter_ref)
    }

    /// Set a single parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replace all parameters.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Opt in to artifact reuse.
    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse_artifacts = reuse;
        self
    }

    /// Content hash referenced in params for a pre-existing input artifact.
    pub fn artifact_reference(&self, input: ContentType) -> Option<&str> {
        self.params
            .get(input.artifact_param_key())
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A unit of generation work. Snapshots returned to callers are clones of this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique identifier (UUID).
    pub id: String,

    /// Batch this job was submitted in.
    pub batch_id: String,

    /// Monotonic creation order, used as the ready-queue tie-break.
    pub sequence: u64,

    pub content_type: ContentType,

    pub chapter_ref: String,

    pub params: Params,

    pub state: JobState,

    /// Jobs that must succeed before this one may run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Pre-existing inputs referenced directly through params.
    #[serde(default)]
    pub input_artifacts: InputArtifacts,

    #[serde(default)]
    pub reuse_artifacts: bool,

    /// Number of adapter invocations started so far.
    pub attempt_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<GenerationError>,

    /// Generated output (set only on Succeeded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_cause: Option<CancelCause>,

    pub created_at: DateTime<Utc>,

    /// First time the job entered Running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Set while the job waits out a retry backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Duration of the successful attempt in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
}

impl Job {
    /// Create a Pending job from a request.
    pub fn from_request(request: JobRequest, batch_id: &str, sequence: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            sequence,
            content_type: request.content_type,
            chapter_ref: request.chapter_ref,
            params: request.params,
            state: JobState::Pending,
            dependencies: Vec::new(),
            input_artifacts: InputArtifacts::default(),
            reuse_artifacts: request.reuse_artifacts,
            attempt_count: 0,
            last_error: None,
            artifact: None,
            cancel_cause: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            next_attempt_at: None,
            processing_ms: None,
        }
    }

    /// Location of the produced artifact, if any.
    pub fn artifact_ref(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.location_ref.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_state_is_not_terminal() {
        let state = JobState::Pending;
        assert!(!state.is_terminal());
        assert!(state.can_cancel());
        assert!(!state.can_retry());
        assert_eq!(state.state_type(), "pending");
    }

    #[test]
    fn test_terminal_states() {
        for state in [JobState::Succeeded, JobState::Failed, JobState::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.can_cancel());
        }
        assert!(!JobState::Succeeded.can_retry());
        assert!(JobState::Failed.can_retry());
        assert!(JobState::Cancelled.can_retry());
    }

    #[test]
    fn test_content_type_parsing() {
        assert_eq!("illustration".parse::<ContentType>(), Ok(ContentType::Illustration));
        assert_eq!(" Speech ".parse::<ContentType>(), Ok(ContentType::Audio));
        assert_eq!("video".parse::<ContentType>(), Ok(ContentType::Video));
        assert!("social_post".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_video_requires_illustration_and_audio() {
        assert_eq!(
            ContentType::Video.required_inputs(),
            &[ContentType::Illustration, ContentType::Audio]
        );
        assert!(ContentType::Audio.required_inputs().is_empty());
    }

    #[test]
    fn test_request_serialization() {
        let request = JobRequest::video("ch1")
            .with_param("resolution", "1080x1920")
            .with_param("illustration_artifact", "abc");

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"content_type\":\"video\""));

        let parsed: JobRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(
            parsed.artifact_reference(ContentType::Illustration),
            Some("abc")
        );
        assert_eq!(parsed.artifact_reference(ContentType::Audio), None);
    }

    #[test]
    fn test_request_defaults_from_minimal_json() {
        let parsed: JobRequest =
            serde_json::from_str(r#"{"content_type":"audio","chapter_ref":"ch7"}"#).unwrap();
        assert!(parsed.params.is_empty());
        assert!(!parsed.reuse_artifacts);
    }

    #[test]
    fn test_job_from_request() {
        let job = Job::from_request(JobRequest::audio("ch2").with_param("voice", "nova"), "b-1", 7);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.batch_id, "b-1");
        assert_eq!(job.sequence, 7);
        assert_eq!(job.attempt_count, 0);
        assert!(job.artifact_ref().is_none());
        assert_eq!(job.params.get("voice").and_then(|v| v.as_str()), Some("nova"));
    }

    #[test]
    fn test_cancel_cause_serialization() {
        let cause = CancelCause::DependencyFailed {
            job_id: "j-1".to_string(),
        };
        let json = serde_json::to_string(&cause).unwrap();
        assert!(json.contains("\"type\":\"dependency_failed\""));
    }
}
