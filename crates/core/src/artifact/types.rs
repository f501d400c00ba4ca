//! Artifact records and hashing helpers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::job::{ContentType, Params};

/// Free-form metadata reported by the adapter (model, duration, mime type, ...).
pub type ArtifactMetadata = BTreeMap<String, serde_json::Value>;

/// A stored, immutable piece of generated media.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// SHA-256 hex digest of the bytes.
    pub content_hash: String,
    pub content_type: ContentType,
    pub byte_size: u64,
    /// Where the bytes live (file path or store-specific URI).
    pub location_ref: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    /// Mime type reported by the adapter, if any.
    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.get("mime_type").and_then(|v| v.as_str())
    }
}

/// SHA-256 hex digest of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Returns true if `s` looks like a SHA-256 hex digest.
pub(crate) fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Key identifying "the same generation": equal keys mean identical inputs.
///
/// Covers the content type, the chapter, the params (serialized with sorted
/// keys) and the hashes of any input artifacts.
pub fn generation_key(
    content_type: ContentType,
    chapter_ref: &str,
    params: &Params,
    input_hashes: &[&str],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(chapter_ref.as_bytes());
    hasher.update([0u8]);
    // serde_json::Map keeps keys sorted, so this is canonical.
    hasher.update(serde_json::Value::Object(params.clone()).to_string().as_bytes());
    for hash in input_hashes {
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_hash_bytes() {
        assert_eq!(
            hash_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(is_valid_hash(&hash_bytes(b"")));
        assert!(!is_valid_hash("../../etc/passwd"));
    }

    #[test]
    fn test_generation_key_ignores_key_order() {
        let a = params(json!({"style": "ink", "seed": 4}));
        let mut b = Params::new();
        b.insert("seed".into(), json!(4));
        b.insert("style".into(), json!("ink"));

        assert_eq!(
            generation_key(ContentType::Illustration, "ch1", &a, &[]),
            generation_key(ContentType::Illustration, "ch1", &b, &[])
        );
    }

    #[test]
    fn test_generation_key_distinguishes_inputs() {
        let p = params(json!({"voice": "nova"}));
        let base = generation_key(ContentType::Audio, "ch1", &p, &[]);

        assert_ne!(base, generation_key(ContentType::Audio, "ch2", &p, &[]));
        assert_ne!(base, generation_key(ContentType::Illustration, "ch1", &p, &[]));
        assert_ne!(
            generation_key(ContentType::Video, "ch1", &p, &["a", "b"]),
            generation_key(ContentType::Video, "ch1", &p, &["a", "c"])
        );
    }
}
