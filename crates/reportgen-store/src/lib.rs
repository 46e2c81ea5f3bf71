//! Task store for reportgen
//!
//! The store is the single source of truth for the pipeline. It owns:
//!
//! - the task queue and its lifecycle transitions
//! - provider health / quota rows, updated transactionally so several
//!   worker processes never lose counter updates
//! - the append-only audit log
//! - the global pause flag
//!
//! Two implementations share one contract: [`MemoryTaskStore`] for tests and
//! single-process runs, and [`SqliteTaskStore`] for durable multi-process use.

pub mod error;
pub mod memory;
pub mod retry;
pub mod sqlite;
pub mod store;

mod transition;

#[cfg(test)]
mod contract;

pub use error::{Result, StoreError};
pub use memory::MemoryTaskStore;
pub use retry::RetryPolicy;
pub use sqlite::SqliteTaskStore;
pub use store::{ApprovalOutcome, TaskStore};
