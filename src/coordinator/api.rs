//! Administrative operations and status queries.
//!
//! These back the (external) HTTP layer: trigger-sync, reset-failure-count,
//! trigger-cleanup, clear-cache, sync status and health.

use tracing::{info, warn};

use crate::cleanup::{CleanupKind, CleanupReport};
use crate::error::SyncError;
use crate::health::types::{HealthDepth, HealthReport};
use crate::sync::orchestrator::TriggerOutcome;
use crate::sync::state::{CycleMetrics, FailureSeverity, SyncCycle, SyncStatus};

use super::{ClearScope, SyncEngine};

impl SyncEngine {
    /// Run a sync cycle now and wait for it.
    ///
    /// Returns [`TriggerOutcome::Skipped`] when a cycle is already in flight;
    /// the trigger is dropped, not queued.
    pub async fn trigger_sync(&self) -> TriggerOutcome {
        self.orchestrator.run_cycle().await
    }

    /// Start a sync cycle without waiting. `false` when one is already running.
    pub fn trigger_sync_in_background(&self) -> bool {
        self.orchestrator.trigger_in_background().is_some()
    }

    pub fn reset_failure_count(&self) {
        self.orchestrator.reset_failure_count();
    }

    /// Run a cleanup job out of schedule.
    pub async fn trigger_cleanup(&self, kind: CleanupKind) -> Result<CleanupReport, SyncError> {
        info!(job = %kind, "Cleanup triggered");
        self.cleanup.run(kind).await
    }

    /// Delete cached keys, returning how many were removed.
    pub async fn clear_cache(&self, scope: ClearScope) -> Result<u64, SyncError> {
        let store = self.cache.store();
        let removed = match &scope {
            ClearScope::Pattern(pattern) => store.delete_pattern(pattern).await?,
            ClearScope::All => {
                warn!("Clearing entire cache");
                store.clear_all().await?
            }
        };
        crate::metrics::record_cache_operation("clear", "success");
        info!(%scope, removed, "Cache cleared");
        Ok(removed)
    }

    /// `{running, last_cycle, cycle_count, consecutive_failures, last_error}`
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.orchestrator.status()
    }

    #[must_use]
    pub fn cycle_metrics(&self) -> CycleMetrics {
        self.orchestrator.cycle_metrics()
    }

    #[must_use]
    pub fn cycle_history(&self) -> Vec<SyncCycle> {
        self.orchestrator.history()
    }

    #[must_use]
    pub fn failure_severity(&self) -> FailureSeverity {
        self.orchestrator.failure_severity()
    }

    /// Probe now. A failed memory check on an unhealthy report runs the
    /// emergency eviction before returning.
    pub async fn health(&self, depth: HealthDepth) -> HealthReport {
        self.monitor.check(depth).await
    }

    /// Report from the most recent probe round, scheduled or on demand.
    #[must_use]
    pub fn last_health_report(&self) -> Option<HealthReport> {
        self.monitor.last_report()
    }
}
