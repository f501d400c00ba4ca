//! Job and batch records tracked by the orchestrator.

mod batch;
mod filter;
mod types;

pub use batch::{Batch, BatchProgress, BatchSnapshot, BatchStatus};
pub use filter::JobFilter;
pub use types::{CancelCause, ContentType, Job, JobRequest, JobState, Params};
