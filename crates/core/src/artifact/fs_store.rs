//! File system artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::ArtifactError;
use super::traits::ArtifactStore;
use super::types::{hash_bytes, is_valid_hash, Artifact, ArtifactMetadata};
use crate::job::ContentType;

/// Stores artifacts as files sharded by hash prefix.
///
/// Layout: `<root>/<hash[0..2]>/<hash>` for the bytes and
/// `<root>/<hash[0..2]>/<hash>.json` for the record. Both are written to a
/// temporary file first and renamed into place, so readers never observe a
/// partial artifact.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, content_hash: &str) -> PathBuf {
        self.root.join(&content_hash[..2])
    }

    fn data_path(&self, content_hash: &str) -> PathBuf {
        self.shard_dir(content_hash).join(content_hash)
    }

    fn record_path(&self, content_hash: &str) -> PathBuf {
        self.shard_dir(content_hash)
            .join(format!("{}.json", content_hash))
    }

    fn check_hash(content_hash: &str) -> Result<(), ArtifactError> {
        if is_valid_hash(content_hash) {
            Ok(())
        } else {
            Err(ArtifactError::InvalidHash {
                content_hash: content_hash.to_string(),
            })
        }
    }

    /// Write to a sibling temp file, then rename into place.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let write_failed = |source| ArtifactError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::create(&tmp).await.map_err(write_failed)?;
        file.write_all(bytes).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_failed(e));
        }
        Ok(())
    }

    async fn read_record(&self, content_hash: &str) -> Result<Option<Artifact>, ArtifactError> {
        match fs::read(self.record_path(content_hash)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put(
        &self,
        bytes: Vec<u8>,
        content_type: ContentType,
        metadata: ArtifactMetadata,
    ) -> Result<Artifact, ArtifactError> {
        let content_hash = hash_bytes(&bytes);

        if let Some(existing) = self.read_record(&content_hash).await? {
            debug!(content_hash = %content_hash, "Artifact already stored");
            return Ok(existing);
        }

        fs::create_dir_all(self.shard_dir(&content_hash)).await?;

        let data_path = self.data_path(&content_hash);
        Self::write_atomic(&data_path, &bytes).await?;

        let artifact = Artifact {
            content_hash: content_hash.clone(),
            content_type,
            byte_size: bytes.len() as u64,
            location_ref: data_path.to_string_lossy().into_owned(),
            created_at: Utc::now(),
            metadata,
        };

        // The record goes last: its presence marks the artifact as complete.
        let record = serde_json::to_vec_pretty(&artifact)?;
        Self::write_atomic(&self.record_path(&content_hash), &record).await?;

        debug!(
            content_hash = %content_hash,
            content_type = %content_type,
            byte_size = artifact.byte_size,
            "Stored artifact"
        );

        Ok(artifact)
    }

    async fn get(&self, content_hash: &str) -> Result<Vec<u8>, ArtifactError> {
        Self::check_hash(content_hash)?;
        if self.read_record(content_hash).await?.is_none() {
            return Err(ArtifactError::not_found(content_hash));
        }
        match fs::read(self.data_path(content_hash)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::not_found(content_hash))
            }
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    async fn head(&self, content_hash: &str) -> Result<Option<Artifact>, ArtifactError> {
        if !is_valid_hash(content_hash) {
            return Ok(None);
        }
        self.read_record(content_hash).await
    }
}
