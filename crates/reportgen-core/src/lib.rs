//! Core data model for reportgen
//!
//! This crate defines the records shared by every stage of the generation
//! pipeline:
//!
//! - [`Task`] and its lifecycle [`TaskStatus`]
//! - [`ProviderState`], the persisted health and quota bookkeeping of one backend
//! - [`SanitizerAuditRecord`], the append-only trail of sanitizer passes and reviews
//! - [`Fingerprint`], the dedupe key producers attach to tasks
//! - [`Clock`], the time source every component reads through

pub mod audit;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod provider;
pub mod task;

pub use audit::{AuditKind, AuditNote, NewAuditRecord, SanitizerAuditRecord};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ModelError, Result};
pub use fingerprint::Fingerprint;
pub use ids::{AuditId, TaskId};
pub use provider::{
    HealthPolicy, ProviderHealth, ProviderRegistration, ProviderState, QuotaWindow, SkipReason,
    SlotDecision,
};
pub use task::{NewTask, Task, TaskStatus};
