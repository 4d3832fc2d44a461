//! Batch cycle entry point for firewood logistics.
//!
//! [`CycleOrchestrator::run_cycle`] runs quarantine release, the optional
//! clean start, and then per county: reservations, sales, driver
//! assignment, route building and planned-route persistence. Unmatched
//! requests are kept in a [`FailedMatchLedger`] with exponential backoff.

pub mod backoff;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod settings;
pub mod telemetry;

pub use backoff::ExponentialBackoff;
pub use error::{BuilderError, OrchestratorError};
pub use ledger::{FailedMatchLedger, LedgerDelta};
pub use orchestrator::{
    CleanupReport, CountyReport, CycleConfig, CycleOrchestrator, CycleOrchestratorBuilder,
    CycleReport, InitMode,
};
pub use telemetry::init_tracing;
