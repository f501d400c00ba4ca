//! Content-addressable storage for generated media.
//!
//! Adapters write generated bytes through an [`ArtifactStore`] and hand back
//! the resulting [`Artifact`]; jobs only ever carry the record, never the bytes.

mod error;
mod fs_store;
mod memory_store;
mod traits;
mod types;

pub use error::ArtifactError;
pub use fs_store::FsArtifactStore;
pub use memory_store::MemoryArtifactStore;
pub use traits::ArtifactStore;
pub use types::{generation_key, hash_bytes, Artifact, ArtifactMetadata};
