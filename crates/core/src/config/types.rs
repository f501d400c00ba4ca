use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::generator::{FfmpegComposerConfig, HttpGeneratorConfig};
use crate::job::ContentType;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub generators: GeneratorsConfig,
}

/// Artifact store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_root")]
    pub root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifacts_root(),
        }
    }
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("./data/artifacts")
}

/// Database configuration. Without a path, job state lives in memory only.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Filter directive used when RUST_LOG is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here when the run ends.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Generator backend per capability. Unset capabilities get no adapter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeneratorsConfig {
    #[serde(default)]
    pub illustration: Option<GeneratorBackend>,
    #[serde(default)]
    pub audio: Option<GeneratorBackend>,
    #[serde(default)]
    pub video: Option<GeneratorBackend>,
}

impl GeneratorsConfig {
    pub fn get(&self, capability: ContentType) -> Option<&GeneratorBackend> {
        match capability {
            ContentType::Illustration => self.illustration.as_ref(),
            ContentType::Audio => self.audio.as_ref(),
            ContentType::Video => self.video.as_ref(),
        }
    }
}

/// Available generator backends
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GeneratorBackend {
    /// JSON-over-HTTP provider
    Http(HttpGeneratorConfig),
    /// Local ffmpeg composition (video only)
    Ffmpeg(FfmpegComposerConfig),
    /// In-process mock, for dry runs
    Mock {
        #[serde(default = "default_mock_delay_ms")]
        delay_ms: u64,
    },
}

fn default_mock_delay_ms() -> u64 {
    100
}

impl GeneratorBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorBackend::Http(_) => "http",
            GeneratorBackend::Ffmpeg(_) => "ffmpeg",
            GeneratorBackend::Mock { .. } => "mock",
        }
    }
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub orchestrator: OrchestratorConfig,
    pub artifacts: ArtifactsConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub generators: SanitizedGeneratorsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGeneratorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub illustration: Option<SanitizedGeneratorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<SanitizedGeneratorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<SanitizedGeneratorConfig>,
}

/// Sanitized backend config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGeneratorConfig {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub api_key_configured: bool,
}

impl From<&GeneratorBackend> for SanitizedGeneratorConfig {
    fn from(backend: &GeneratorBackend) -> Self {
        let (endpoint, api_key_configured) = match backend {
            GeneratorBackend::Http(http) => (
                Some(http.endpoint.clone()),
                http.api_key.as_ref().is_some_and(|k| !k.is_empty()),
            ),
            _ => (None, false),
        };
        Self {
            backend: backend.kind().to_string(),
            endpoint,
            api_key_configured,
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let generators = &config.generators;
        Self {
            orchestrator: config.orchestrator.clone(),
            artifacts: config.artifacts.clone(),
            database: config.database.clone(),
            logging: config.logging.clone(),
            metrics: config.metrics.clone(),
            generators: SanitizedGeneratorsConfig {
                illustration: generators.illustration.as_ref().map(Into::into),
                audio: generators.audio.as_ref().map(Into::into),
                video: generators.video.as_ref().map(Into::into),
            },
        }
    }
}
