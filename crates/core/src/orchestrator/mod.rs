//! Job orchestration.
//!
//! Jobs move Pending → Ready → Running → {Succeeded, Failed, Cancelled}:
//! - **Dependencies**: a video becomes Ready only once its illustration and
//!   audio inputs have succeeded
//! - **Slots**: each capability has its own bounded pool
//! - **Retries**: retryable errors back off exponentially up to a budget

mod config;
mod coordinator;
mod runner;
pub(crate) mod table;
mod types;

pub use config::{OrchestratorConfig, RetryConfig, SlotConfig, TimeoutConfig};
pub use coordinator::BatchCoordinator;
pub use runner::Orchestrator;
pub use types::{OrchestratorError, OrchestratorStatus, PoolStatus};
