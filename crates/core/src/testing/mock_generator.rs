//! Mock generator adapter for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use crate::artifact::{hash_bytes, Artifact, ArtifactMetadata, ArtifactStore, MemoryArtifactStore};
use crate::generator::{GenerationError, GenerationTask, GeneratorAdapter};
use crate::job::ContentType;

/// A recorded adapter call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedGeneration {
    /// The task the orchestrator handed over.
    pub task: GenerationTask,
    pub started: Instant,
    pub finished: Instant,
    /// Content hash on success, the error otherwise.
    pub outcome: Result<String, GenerationError>,
}

/// Mock implementation of the GeneratorAdapter trait.
///
/// Provides controllable behavior for testing:
/// - Record every call with its start and finish instants
/// - Queue one-shot errors or fail every call
/// - Per-chapter errors and delays
/// - Track how many calls overlap
///
/// Artifacts are written to a [`MemoryArtifactStore`] unless another store is
/// supplied with [`with_store`](Self::with_store). Clones share all state.
///
/// # Example
///
/// ```rust,ignore
/// use chapterforge_core::testing::MockGenerator;
///
/// let audio = MockGenerator::new(ContentType::Audio);
/// audio.set_delay(Duration::from_millis(50)).await;
/// audio.set_next_error(GenerationError::rate_limited("slow down")).await;
///
/// // Register and run...
///
/// assert_eq!(audio.call_count().await, 2);
/// ```
#[derive(Clone)]
pub struct MockGenerator {
    name: String,
    capability: ContentType,
    store: Arc<dyn ArtifactStore>,
    /// Recorded calls.
    calls: Arc<RwLock<Vec<RecordedGeneration>>>,
    /// Errors returned by the next calls, in order.
    next_errors: Arc<RwLock<VecDeque<GenerationError>>>,
    /// If set, every call fails with this error.
    always_error: Arc<RwLock<Option<GenerationError>>>,
    /// Errors returned for every call on a chapter.
    chapter_errors: Arc<RwLock<HashMap<String, GenerationError>>>,
    /// Simulated generation time in milliseconds.
    delay_ms: Arc<RwLock<u64>>,
    chapter_delays_ms: Arc<RwLock<HashMap<String, u64>>>,
    /// Extra delay up to this bound, derived from the job id.
    jitter_ms: Arc<RwLock<u64>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockGenerator {
    /// Create a mock named after its capability.
    pub fn new(capability: ContentType) -> Self {
        Self::named(format!("mock-{}", capability), capability)
    }

    pub fn named(name: impl Into<String>, capability: ContentType) -> Self {
        Self {
            name: name.into(),
            capability,
            store: Arc::new(MemoryArtifactStore::new()),
            calls: Arc::new(RwLock::new(Vec::new())),
            next_errors: Arc::new(RwLock::new(VecDeque::new())),
            always_error: Arc::new(RwLock::new(None)),
            chapter_errors: Arc::new(RwLock::new(HashMap::new())),
            delay_ms: Arc::new(RwLock::new(10)),
            chapter_delays_ms: Arc::new(RwLock::new(HashMap::new())),
            jitter_ms: Arc::new(RwLock::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Write artifacts into the given store.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Get all recorded calls, in start order.
    pub async fn recorded_calls(&self) -> Vec<RecordedGeneration> {
        let mut calls = self.calls.read().await.clone();
        calls.sort_by_key(|c| c.started);
        calls
    }

    /// Recorded calls for one chapter.
    pub async fn calls_for(&self, chapter_ref: &str) -> Vec<RecordedGeneration> {
        self.recorded_calls()
            .await
            .into_iter()
            .filter(|c| c.task.chapter_ref == chapter_ref)
            .collect()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue an error for the next call. Queued errors are consumed in order.
    pub async fn set_next_error(&self, error: GenerationError) {
        self.next_errors.write().await.push_back(error);
    }

    /// Fail every call with the given error.
    pub async fn set_always_error(&self, error: GenerationError) {
        *self.always_error.write().await = Some(error);
    }

    /// Fail every call for one chapter.
    pub async fn set_chapter_error(&self, chapter_ref: impl Into<String>, error: GenerationError) {
        self.chapter_errors
            .write()
            .await
            .insert(chapter_ref.into(), error);
    }

    /// Clear every configured error.
    pub async fn clear_errors(&self) {
        self.next_errors.write().await.clear();
        *self.always_error.write().await = None;
        self.chapter_errors.write().await.clear();
    }

    /// Set the simulated generation time.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay_ms.write().await = delay.as_millis() as u64;
    }

    pub async fn set_chapter_delay(&self, chapter_ref: impl Into<String>, delay: Duration) {
        self.chapter_delays_ms
            .write()
            .await
            .insert(chapter_ref.into(), delay.as_millis() as u64);
    }

    /// Add a per-job pseudo-random delay in `0..=max`.
    pub async fn set_jitter(&self, max: Duration) {
        *self.jitter_ms.write().await = max.as_millis() as u64;
    }

    async fn delay_for(&self, task: &GenerationTask) -> Duration {
        let base = match self.chapter_delays_ms.read().await.get(&task.chapter_ref) {
            Some(ms) => *ms,
            None => *self.delay_ms.read().await,
        };
        let jitter = *self.jitter_ms.read().await;
        let extra = if jitter == 0 {
            0
        } else {
            let hash = hash_bytes(task.job_id.as_bytes());
            u64::from_str_radix(&hash[..8], 16).unwrap_or(0) % (jitter + 1)
        };
        Duration::from_millis(base + extra)
    }

    async fn take_error(&self, task: &GenerationTask) -> Option<GenerationError> {
        if let Some(error) = self.next_errors.write().await.pop_front() {
            return Some(error);
        }
        if let Some(error) = self.chapter_errors.read().await.get(&task.chapter_ref) {
            return Some(error.clone());
        }
        self.always_error.read().await.clone()
    }

    async fn produce(&self, task: &GenerationTask) -> Result<Artifact, GenerationError> {
        let payload = format!(
            "{}|{}|{}",
            task.content_type,
            task.chapter_ref,
            task.inputs.hashes().join(",")
        );

        let mut metadata = ArtifactMetadata::new();
        metadata.insert("provider".to_string(), json!(self.name));
        metadata.insert("chapter_ref".to_string(), json!(task.chapter_ref));

        Ok(self
            .store
            .put(payload.into_bytes(), task.content_type, metadata)
            .await?)
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GeneratorAdapter for MockGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> ContentType {
        self.capability
    }

    async fn generate(&self, task: GenerationTask) -> Result<Artifact, GenerationError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let started = Instant::now();
        let delay = self.delay_for(&task).await;
        tokio::time::sleep(delay).await;

        let result = match self.take_error(&task).await {
            Some(error) => Err(error),
            None => self.produce(&task).await,
        };

        self.calls.write().await.push(RecordedGeneration {
            task,
            started,
            finished: Instant::now(),
            outcome: result
                .as_ref()
                .map(|a| a.content_hash.clone())
                .map_err(Clone::clone),
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GenerationErrorKind, InputArtifacts};
    use crate::job::Params;

    fn task(job_id: &str, chapter_ref: &str) -> GenerationTask {
        GenerationTask {
            job_id: job_id.to_string(),
            chapter_ref: chapter_ref.to_string(),
            content_type: ContentType::Audio,
            params: Params::new(),
            attempt: 1,
            inputs: InputArtifacts::default(),
        }
    }

    #[tokio::test]
    async fn test_generate_writes_to_store() {
        let store = Arc::new(MemoryArtifactStore::new());
        let mock = MockGenerator::new(ContentType::Audio).with_store(store.clone());

        let artifact = mock.generate(task("j1", "ch1")).await.unwrap();

        assert_eq!(artifact.content_type, ContentType::Audio);
        assert!(store.head(&artifact.content_hash).await.unwrap().is_some());
        assert_eq!(mock.call_count().await, 1);
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_queued_errors_then_success() {
        let mock = MockGenerator::new(ContentType::Audio);
        mock.set_next_error(GenerationError::rate_limited("429")).await;
        mock.set_next_error(GenerationError::timeout("slow")).await;

        let first = mock.generate(task("j1", "ch1")).await.unwrap_err();
        let second = mock.generate(task("j1", "ch1")).await.unwrap_err();
        let third = mock.generate(task("j1", "ch1")).await;

        assert_eq!(first.kind, GenerationErrorKind::RateLimited);
        assert_eq!(second.kind, GenerationErrorKind::Timeout);
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_chapter_error_only_affects_that_chapter() {
        let mock = MockGenerator::new(ContentType::Audio);
        mock.set_chapter_error("bad", GenerationError::invalid_input("nope"))
            .await;

        assert!(mock.generate(task("j1", "bad")).await.is_err());
        assert!(mock.generate(task("j2", "good")).await.is_ok());
        assert_eq!(mock.calls_for("bad").await.len(), 1);
    }
}
