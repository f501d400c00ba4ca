//! In-memory artifact store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::error::ArtifactError;
use super::traits::ArtifactStore;
use super::types::{hash_bytes, Artifact, ArtifactMetadata};
use crate::job::ContentType;

/// Artifact store backed by a map. Useful for tests and dry runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<HashMap<String, (Artifact, Vec<u8>)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct artifacts stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        bytes: Vec<u8>,
        content_type: ContentType,
        metadata: ArtifactMetadata,
    ) -> Result<Artifact, ArtifactError> {
        let content_hash = hash_bytes(&bytes);
        let mut entries = self.entries.write().await;

        if let Some((existing, _)) = entries.get(&content_hash) {
            return Ok(existing.clone());
        }

        let artifact = Artifact {
            location_ref: format!("memory://{}", content_hash),
            content_hash: content_hash.clone(),
            content_type,
            byte_size: bytes.len() as u64,
            created_at: Utc::now(),
            metadata,
        };
        entries.insert(content_hash, (artifact.clone(), bytes));
        Ok(artifact)
    }

    async fn get(&self, content_hash: &str) -> Result<Vec<u8>, ArtifactError> {
        self.entries
            .read()
            .await
            .get(content_hash)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ArtifactError::not_found(content_hash))
    }

    async fn head(&self, content_hash: &str) -> Result<Option<Artifact>, ArtifactError> {
        Ok(self
            .entries
            .read()
            .await
            .get(content_hash)
            .map(|(artifact, _)| artifact.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_head() {
        let store = MemoryArtifactStore::new();
        let artifact = store
            .put(b"png".to_vec(), ContentType::Illustration, ArtifactMetadata::new())
            .await
            .unwrap();

        assert_eq!(artifact.byte_size, 3);
        assert!(artifact.location_ref.starts_with("memory://"));
        assert_eq!(store.get(&artifact.content_hash).await.unwrap(), b"png");
        assert_eq!(
            store.head(&artifact.content_hash).await.unwrap(),
            Some(artifact)
        );
    }

    #[tokio::test]
    async fn test_put_is_append_only() {
        let store = MemoryArtifactStore::new();
        let first = store
            .put(b"same".to_vec(), ContentType::Audio, ArtifactMetadata::new())
            .await
            .unwrap();
        let second = store
            .put(b"same".to_vec(), ContentType::Audio, ArtifactMetadata::new())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let store = MemoryArtifactStore::new();
        assert!(store.head("abc").await.unwrap().is_none());
        assert!(matches!(
            store.get("abc").await,
            Err(ArtifactError::NotFound { .. })
        ));
    }
}
