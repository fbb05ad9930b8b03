//! # vaultkeep-compounder
//!
//! The compounding engine: which vaults are due, one cycle per due vault,
//! and what gets written afterwards.
//!
//! - [`Store`] wraps the database with retries on transient errors.
//! - [`Registry`] owns vault state and the `in_progress` claim.
//! - [`RetryController`] bounds and spaces submission attempts.
//! - [`CycleRunner`] runs one cycle: submit, read prices and vault state,
//!   derive [`metrics`], record.
//! - [`Scheduler`] ticks, dispatches due vaults and drains on shutdown.
//! - [`Health`] keeps counters for the control socket.

pub mod cycle;
pub mod health;
pub mod metrics;
pub mod recorder;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use cycle::{CycleOutcome, CycleReport, CycleRunner, CycleSettings};
pub use health::{Health, HealthSnapshot};
pub use metrics::Valuation;
pub use recorder::{RecordAck, RecordError, Recorder};
pub use registry::{Completion, Registry, RegistryError};
pub use retry::{RetryController, RetryOutcome};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{Store, StoreError};
