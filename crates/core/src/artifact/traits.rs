//! Trait definitions for artifact storage.

use async_trait::async_trait;

use super::error::ArtifactError;
use super::types::{Artifact, ArtifactMetadata};
use crate::job::ContentType;

/// Append-only, content-addressed artifact storage.
///
/// Writing bytes that are already stored returns the existing record
/// unchanged.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Persist bytes and return their artifact record.
    async fn put(
        &self,
        bytes: Vec<u8>,
        content_type: ContentType,
        metadata: ArtifactMetadata,
    ) -> Result<Artifact, ArtifactError>;

    /// Read the bytes of a stored artifact.
    async fn get(&self, content_hash: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Look up an artifact record without reading its bytes.
    async fn head(&self, content_hash: &str) -> Result<Option<Artifact>, ArtifactError>;
}
