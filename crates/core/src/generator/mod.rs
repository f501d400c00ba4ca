//! Generator adapters: the uniform interface over external media providers.
//!
//! Every adapter serves exactly one capability (a [`ContentType`]), writes the
//! bytes it produces to the artifact store and returns the stored
//! [`Artifact`](crate::artifact::Artifact).
//!
//! [`ContentType`]: crate::job::ContentType

mod config;
mod error;
mod ffmpeg;
mod http;
mod registry;
mod traits;
mod types;

pub use config::{FfmpegComposerConfig, HttpGeneratorConfig};
pub use error::{GenerationError, GenerationErrorKind};
pub use ffmpeg::FfmpegComposer;
pub use http::{classify_status, HttpGenerator};
pub use registry::AdapterRegistry;
pub use traits::GeneratorAdapter;
pub use types::{GenerationTask, InputArtifacts};
