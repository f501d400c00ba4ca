//! Trait definitions for generator adapters.

use async_trait::async_trait;

use super::error::GenerationError;
use super::types::GenerationTask;
use crate::artifact::Artifact;
use crate::job::ContentType;

/// A provider that turns a generation task into a stored artifact.
///
/// Implementations are shared across concurrent attempts and must not keep
/// per-request mutable state.
#[async_trait]
pub trait GeneratorAdapter: Send + Sync {
    /// Returns the name of this adapter implementation.
    fn name(&self) -> &str;

    /// The content type this adapter produces.
    fn capability(&self) -> ContentType;

    /// Generate, store and return the artifact for one attempt.
    async fn generate(&self, task: GenerationTask) -> Result<Artifact, GenerationError>;

    /// Validates that the adapter is properly configured and ready.
    async fn validate(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}
