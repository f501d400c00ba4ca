//! Generic JSON-over-HTTP generation provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use tracing::{debug, warn};

use super::config::HttpGeneratorConfig;
use super::error::GenerationError;
use super::traits::GeneratorAdapter;
use super::types::GenerationTask;
use crate::artifact::{Artifact, ArtifactMetadata, ArtifactStore};
use crate::job::{ContentType, Params};

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    job_id: &'a str,
    chapter_ref: &'a str,
    content_type: ContentType,
    attempt: u32,
    params: &'a Params,
}

/// Map a non-success HTTP status to a generation error.
///
/// Returns `None` for 2xx responses.
pub fn classify_status(status: u16, body: &str) -> Option<GenerationError> {
    if (200..300).contains(&status) {
        return None;
    }

    let detail = if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("HTTP {}: {}...", status, &body[..end])
    } else if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };

    Some(match status {
        429 => GenerationError::rate_limited(detail),
        408 | 504 => GenerationError::timeout(detail),
        500..=599 => GenerationError::provider_unavailable(detail),
        400..=499 => GenerationError::invalid_input(detail),
        _ => GenerationError::unknown(detail),
    })
}

/// Adapter that POSTs `{job_id, chapter_ref, content_type, attempt, params}`
/// to a provider endpoint and stores the response body as the artifact.
pub struct HttpGenerator {
    name: String,
    capability: ContentType,
    client: Client,
    config: HttpGeneratorConfig,
    store: Arc<dyn ArtifactStore>,
}

impl HttpGenerator {
    /// Create a new HTTP generator for one capability.
    pub fn new(
        capability: ContentType,
        config: HttpGeneratorConfig,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GenerationError::unknown(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("http-{}", capability),
            capability,
            client,
            config,
            store,
        })
    }

    fn map_request_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::timeout(format!(
                "request to {} timed out after {}ms",
                self.config.endpoint, self.config.request_timeout_ms
            ))
        } else if e.is_connect() {
            GenerationError::provider_unavailable(format!(
                "failed to connect to {}: {}",
                self.config.endpoint, e
            ))
        } else {
            GenerationError::unknown(format!("request failed: {}", e))
        }
    }
}

#[async_trait]
impl GeneratorAdapter for HttpGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> ContentType {
        self.capability
    }

    async fn generate(&self, task: GenerationTask) -> Result<Artifact, GenerationError> {
        let body = GenerateRequest {
            job_id: &task.job_id,
            chapter_ref: &task.chapter_ref,
            content_type: task.content_type,
            attempt: task.attempt,
            params: &task.params,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(
            job_id = %task.job_id,
            endpoint = %self.config.endpoint,
            attempt = task.attempt,
            "Sending generation request"
        );

        let response = request.send().await.map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), text.trim())
                .unwrap_or_else(|| GenerationError::unknown(format!("HTTP {}", status)));
            warn!(
                job_id = %task.job_id,
                status = status.as_u16(),
                kind = %err.kind,
                "Provider returned an error"
            );
            return Err(err);
        }

        let mime_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.config.mime_type.clone());

        let bytes = response.bytes().await.map_err(|e| self.map_request_error(e))?;
        if bytes.is_empty() {
            return Err(GenerationError::provider_unavailable(
                "provider returned an empty body",
            ));
        }

        let mut metadata = ArtifactMetadata::new();
        metadata.insert("provider".into(), self.name.clone().into());
        if let Some(mime) = mime_type {
            metadata.insert("mime_type".into(), mime.into());
        }
        if let Some(ref model) = self.config.model {
            metadata.insert("model".into(), model.clone().into());
        }

        let artifact = self
            .store
            .put(bytes.to_vec(), self.capability, metadata)
            .await?;

        Ok(artifact)
    }

    async fn validate(&self) -> Result<(), GenerationError> {
        reqwest::Url::parse(&self.config.endpoint).map_err(|e| {
            GenerationError::invalid_input(format!(
                "invalid endpoint {}: {}",
                self.config.endpoint, e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::generator::GenerationErrorKind;

    #[test]
    fn test_classify_success() {
        assert!(classify_status(200, "").is_none());
        assert!(classify_status(201, "created").is_none());
    }

    #[test]
    fn test_classify_errors() {
        let kind = |status| classify_status(status, "").map(|e| e.kind);

        assert_eq!(kind(429), Some(GenerationErrorKind::RateLimited));
        assert_eq!(kind(408), Some(GenerationErrorKind::Timeout));
        assert_eq!(kind(504), Some(GenerationErrorKind::Timeout));
        assert_eq!(kind(500), Some(GenerationErrorKind::ProviderUnavailable));
        assert_eq!(kind(503), Some(GenerationErrorKind::ProviderUnavailable));
        assert_eq!(kind(400), Some(GenerationErrorKind::InvalidInput));
        assert_eq!(kind(404), Some(GenerationErrorKind::InvalidInput));
        assert_eq!(kind(302), Some(GenerationErrorKind::Unknown));
    }

    #[test]
    fn test_classify_truncates_body() {
        let body = "é".repeat(600);
        let err = classify_status(500, &body).unwrap();
        assert!(err.message.ends_with("..."));
        assert!(err.message.len() < body.len());
    }

    #[tokio::test]
    async fn test_connection_refused_is_provider_unavailable() {
        let store = Arc::new(MemoryArtifactStore::new());
        let mut config = HttpGeneratorConfig::new("http://127.0.0.1:1/generate");
        config.request_timeout_ms = 2_000;
        let generator = HttpGenerator::new(ContentType::Illustration, config, store).unwrap();

        let task = GenerationTask {
            job_id: "j-1".into(),
            chapter_ref: "ch1".into(),
            content_type: ContentType::Illustration,
            params: Params::new(),
            attempt: 1,
            inputs: Default::default(),
        };

        let err = generator.generate(task).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_endpoint() {
        let store = Arc::new(MemoryArtifactStore::new());
        let generator = HttpGenerator::new(
            ContentType::Audio,
            HttpGeneratorConfig::new("not a url"),
            store,
        )
        .unwrap();

        assert_eq!(generator.name(), "http-audio");
        assert!(generator.validate().await.is_err());
    }
}
