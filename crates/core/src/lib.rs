pub mod artifact;
pub mod config;
pub mod generator;
pub mod job;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod store;
pub mod testing;

pub use artifact::{
    generation_key, hash_bytes, Artifact, ArtifactError, ArtifactMetadata, ArtifactStore,
    FsArtifactStore, MemoryArtifactStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, ArtifactsConfig, Config, ConfigError,
    DatabaseConfig, GeneratorBackend, GeneratorsConfig, LoggingConfig, MetricsConfig,
    SanitizedConfig,
};
pub use generator::{
    AdapterRegistry, FfmpegComposer, FfmpegComposerConfig, GenerationError, GenerationErrorKind,
    GenerationTask, GeneratorAdapter, HttpGenerator, HttpGeneratorConfig, InputArtifacts,
};
pub use job::{
    Batch, BatchProgress, BatchSnapshot, BatchStatus, CancelCause, ContentType, Job, JobFilter,
    JobRequest, JobState, Params,
};
pub use notify::{
    create_notification_channel, ChannelSink, Notification, NotificationEnvelope,
    NotificationSink,
};
pub use orchestrator::{
    BatchCoordinator, Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus,
    PoolStatus, RetryConfig, SlotConfig, TimeoutConfig,
};
pub use store::{JobStore, SqliteJobStore, StoreError};
