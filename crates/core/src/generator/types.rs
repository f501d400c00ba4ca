//! Types passed to generator adapters.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::job::{ContentType, Params};

/// Finished artifacts a job consumes. Empty for illustration and audio.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Artifact>,
}

impl InputArtifacts {
    pub fn is_empty(&self) -> bool {
        self.illustration.is_none() && self.audio.is_none()
    }

    pub fn get(&self, content_type: ContentType) -> Option<&Artifact> {
        match content_type {
            ContentType::Illustration => self.illustration.as_ref(),
            ContentType::Audio => self.audio.as_ref(),
            ContentType::Video => None,
        }
    }

    /// Store an input in the given slot. Video artifacts are never inputs.
    pub fn set_for(&mut self, content_type: ContentType, artifact: Artifact) {
        match content_type {
            ContentType::Illustration => self.illustration = Some(artifact),
            ContentType::Audio => self.audio = Some(artifact),
            ContentType::Video => {}
        }
    }

    /// Content hashes in a stable order, for generation keys.
    pub fn hashes(&self) -> Vec<&str> {
        [self.illustration.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .map(|a| a.content_hash.as_str())
            .collect()
    }
}

/// One adapter invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationTask {
    pub job_id: String,
    pub chapter_ref: String,
    pub content_type: ContentType,
    pub params: Params,
    /// 1-based attempt number.
    pub attempt: u32,
    pub inputs: InputArtifacts,
}

impl GenerationTask {
    /// String parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Unsigned integer parameter lookup.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}
