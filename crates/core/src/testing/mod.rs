//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides a mock generator adapter and fixtures for driving
//! the orchestrator end to end without real providers or ffmpeg.
//!
//! # Example
//!
//! ```rust,ignore
//! use chapterforge_core::testing::fixtures::{self, MockSet};
//!
//! let mocks = MockSet::new();
//! mocks.audio.set_delay(Duration::from_millis(50)).await;
//!
//! let orchestrator = mocks.orchestrator(fixtures::fast_config());
//! orchestrator.start();
//! ```

mod mock_generator;

pub use mock_generator::{MockGenerator, RecordedGeneration};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use super::MockGenerator;
    use crate::artifact::{ArtifactStore, MemoryArtifactStore};
    use crate::generator::AdapterRegistry;
    use crate::job::{ContentType, JobRequest};
    use crate::orchestrator::{
        Orchestrator, OrchestratorConfig, RetryConfig, SlotConfig, TimeoutConfig,
    };

    /// Config with short backoff and timeouts so tests finish quickly.
    pub fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            slots: SlotConfig::uniform(2),
            timeouts: TimeoutConfig {
                illustration_ms: 2_000,
                audio_ms: 2_000,
                video_ms: 2_000,
            },
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            },
            notification_buffer: 256,
        }
    }

    /// Illustration, audio and video requests for one chapter.
    pub fn chapter_requests(chapter_ref: &str) -> Vec<JobRequest> {
        vec![
            JobRequest::illustration(chapter_ref),
            JobRequest::audio(chapter_ref),
            JobRequest::video(chapter_ref),
        ]
    }

    /// One mock per capability, all writing to a shared store.
    #[derive(Clone)]
    pub struct MockSet {
        pub store: Arc<MemoryArtifactStore>,
        pub illustration: MockGenerator,
        pub audio: MockGenerator,
        pub video: MockGenerator,
    }

    impl Default for MockSet {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockSet {
        pub fn new() -> Self {
            let store = Arc::new(MemoryArtifactStore::new());
            let shared: Arc<dyn ArtifactStore> = store.clone();
            Self {
                illustration: MockGenerator::new(ContentType::Illustration)
                    .with_store(Arc::clone(&shared)),
                audio: MockGenerator::new(ContentType::Audio).with_store(Arc::clone(&shared)),
                video: MockGenerator::new(ContentType::Video).with_store(shared),
                store,
            }
        }

        pub fn get(&self, capability: ContentType) -> &MockGenerator {
            match capability {
                ContentType::Illustration => &self.illustration,
                ContentType::Audio => &self.audio,
                ContentType::Video => &self.video,
            }
        }

        /// Registry holding clones of all three mocks.
        pub fn registry(&self) -> AdapterRegistry {
            AdapterRegistry::new()
                .with(Arc::new(self.illustration.clone()))
                .with(Arc::new(self.audio.clone()))
                .with(Arc::new(self.video.clone()))
        }

        /// Orchestrator wired to these mocks and their store. Not started.
        pub fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
            Orchestrator::new(config, self.registry(), self.store.clone())
        }
    }
}
