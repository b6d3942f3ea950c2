//! Sync cycle state and the orchestrator that drives it.

pub mod state;
pub mod orchestrator;

pub use orchestrator::{SyncOrchestrator, TriggerOutcome};
pub use state::{CycleMetrics, CycleOutcome, FailureSeverity, SyncCycle, SyncState, SyncStatus};
