//! Configuration for the shipped generator adapters.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a JSON-over-HTTP generation provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpGeneratorConfig {
    /// URL the generation request is POSTed to.
    pub endpoint: String,

    /// Bearer token sent in the Authorization header.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Client-side request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Mime type recorded when the provider sends no Content-Type.
    #[serde(default)]
    pub mime_type: Option<String>,

    /// Model name recorded in artifact metadata.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl HttpGeneratorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            mime_type: None,
            model: None,
        }
    }
}

/// Configuration for the ffmpeg video composer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FfmpegComposerConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Scratch directory for per-attempt working files.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Resolution used when the job has no `resolution` param.
    #[serde(default = "default_resolution")]
    pub default_resolution: String,

    /// Frame rate used when the job has no `fps` param.
    #[serde(default = "default_fps")]
    pub default_fps: u32,

    /// Additional output ffmpeg arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("chapterforge-compose")
}

fn default_resolution() -> String {
    "1080x1920".to_string()
}

fn default_fps() -> u32 {
    30
}

impl Default for FfmpegComposerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            scratch_dir: default_scratch_dir(),
            default_resolution: default_resolution(),
            default_fps: default_fps(),
            extra_args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_defaults() {
        let config = FfmpegComposerConfig::default();
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.default_resolution, "1080x1920");
        assert_eq!(config.default_fps, 30);
    }

    #[test]
    fn test_http_config_from_toml() {
        let config: HttpGeneratorConfig = toml::from_str(
            r#"
            endpoint = "http://localhost:9000/images"
            api_key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "http://localhost:9000/images");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout_ms, 60_000);
    }
}
