//! Write-through persistence for job and batch records.

mod sqlite;
mod traits;

pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StoreError};
