// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health & resource monitor.
//!
//! Runs its probes in parallel and derives one [`HealthReport`]:
//!
//! | Check | Pass | Warn | Fail |
//! |---|---|---|---|
//! | `cache` | round trip ≤ 1000ms | > 1000ms | > 5000ms or error |
//! | `upstream` | ping ok | | ping error |
//! | `memory` | ≤ 80% | > 80% | > 90% |
//! | `dependencies` | all present | no aggregators | |
//! | `sync` | no failures | ≥ 1 failure | ≥ 5 failures |
//!
//! An `Unhealthy` report whose memory check failed invokes the cleanup
//! manager's emergency path. The monitor reads sync state but never writes it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::memory::MemoryProbe;
use super::types::{CheckResult, CheckStatus, HealthDepth, HealthReport, OverallStatus};
use crate::cache::client::CacheClient;
use crate::cache::keys;
use crate::cleanup::CleanupManager;
use crate::config::HealthThresholds;
use crate::pressure::MemoryPressure;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::sync::state::FailureSeverity;
use crate::upstream::client::FetchClient;

pub const CHECK_CACHE: &str = "cache";
pub const CHECK_UPSTREAM: &str = "upstream";
pub const CHECK_MEMORY: &str = "memory";
pub const CHECK_DEPENDENCIES: &str = "dependencies";
pub const CHECK_SYNC: &str = "sync";

/// Lifetime of a probe key if the delete never lands
const PROBE_TTL: Duration = Duration::from_secs(60);

pub struct HealthMonitor {
    cache: CacheClient,
    fetcher: Arc<FetchClient>,
    memory: Arc<dyn MemoryProbe>,
    orchestrator: Arc<SyncOrchestrator>,
    cleanup: Arc<CleanupManager>,
    thresholds: RwLock<HealthThresholds>,
    last_report: RwLock<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(
        cache: CacheClient,
        fetcher: Arc<FetchClient>,
        memory: Arc<dyn MemoryProbe>,
        orchestrator: Arc<SyncOrchestrator>,
        cleanup: Arc<CleanupManager>,
        thresholds: HealthThresholds,
    ) -> Self {
        Self {
            cache,
            fetcher,
            memory,
            orchestrator,
            cleanup,
            thresholds: RwLock::new(thresholds),
            last_report: RwLock::new(None),
        }
    }

    /// Swap thresholds at runtime; the next check uses them.
    pub fn update_thresholds(&self, thresholds: HealthThresholds) {
        *self.thresholds.write() = thresholds;
    }

    /// Most recent report, if any check has run.
    #[must_use]
    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }

    /// Run the probes for `depth`, store the report, and fire the emergency
    /// path when memory pressure made the engine unhealthy.
    #[instrument(skip(self))]
    pub async fn check(&self, depth: HealthDepth) -> HealthReport {
        let thresholds = self.thresholds.read().clone();

        let checks = match depth {
            HealthDepth::Quick => {
                let (cache, memory) = tokio::join!(
                    self.probe_cache(&thresholds),
                    self.probe_memory(&thresholds)
                );
                vec![cache, memory]
            }
            HealthDepth::Full => {
                let (cache, upstream, memory, sync) = tokio::join!(
                    self.probe_cache(&thresholds),
                    self.probe_upstream(),
                    self.probe_memory(&thresholds),
                    self.probe_sync(&thresholds)
                );
                vec![cache, upstream, memory, self.probe_dependencies(), sync]
            }
        };

        for check in &checks {
            crate::metrics::set_check_status(&check.name, check.status as u8);
        }

        let mut report = HealthReport::new(checks);
        crate::metrics::set_health_status(report.overall_status as u8);

        let memory_failed = report
            .check(CHECK_MEMORY)
            .is_some_and(|c| c.status == CheckStatus::Fail);
        if report.overall_status == OverallStatus::Unhealthy && memory_failed {
            error!("Memory check failed, invoking emergency cleanup");
            match self.cleanup.emergency().await {
                Ok(result) => {
                    report.emergency_triggered = true;
                    warn!(keys_cleared = result.keys_cleared, "Emergency cleanup complete");
                }
                Err(e) => error!(error = %e, "Emergency cleanup failed"),
            }
        }

        match report.overall_status {
            OverallStatus::Healthy => debug!("Health check: healthy"),
            status => info!(?status, "Health check completed with issues"),
        }

        *self.last_report.write() = Some(report.clone());
        report
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Probes
    // ═══════════════════════════════════════════════════════════════════════

    /// Write, read back, and delete a probe key.
    async fn probe_cache(&self, thresholds: &HealthThresholds) -> CheckResult {
        let fail_after = Duration::from_millis(thresholds.cache_latency_fail_ms);
        let key = keys::health_probe();
        let token = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        let round_trip = async {
            self.cache.set(&key, &json!(token), PROBE_TTL).await?;
            let read: Option<String> = self.cache.get(&key).await?;
            self.cache.del(&key).await?;
            Ok::<_, crate::storage::traits::StorageError>(read)
        };

        let result = tokio::time::timeout(fail_after, round_trip).await;
        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_millis() as u64;
        crate::metrics::record_probe_latency(CHECK_CACHE, elapsed);

        let check = match result {
            Err(_) => CheckResult::fail(CHECK_CACHE, format!("round trip exceeded {}ms", thresholds.cache_latency_fail_ms)),
            Ok(Err(e)) => CheckResult::fail(CHECK_CACHE, e.to_string()),
            Ok(Ok(read)) if read.as_deref() != Some(token.as_str()) => {
                CheckResult::fail(CHECK_CACHE, "probe value did not round-trip")
            }
            Ok(Ok(_)) if latency_ms > thresholds.cache_latency_fail_ms => {
                CheckResult::fail(CHECK_CACHE, format!("round trip took {}ms", latency_ms))
            }
            Ok(Ok(_)) if latency_ms > thresholds.cache_latency_warn_ms => {
                CheckResult::warn(CHECK_CACHE, format!("round trip took {}ms", latency_ms))
            }
            Ok(Ok(_)) => CheckResult::pass(CHECK_CACHE),
        };
        check.with_latency(latency_ms)
    }

    async fn probe_upstream(&self) -> CheckResult {
        let start = Instant::now();
        let result = self.fetcher.ping().await;
        let elapsed = start.elapsed();
        crate::metrics::record_probe_latency(CHECK_UPSTREAM, elapsed);

        match result {
            Ok(()) => CheckResult::pass(CHECK_UPSTREAM),
            Err(e) => CheckResult::fail(CHECK_UPSTREAM, e.to_string()),
        }
        .with_latency(elapsed.as_millis() as u64)
    }

    async fn probe_memory(&self, thresholds: &HealthThresholds) -> CheckResult {
        let sample = match self.memory.sample() {
            Ok(sample) => sample,
            Err(e) => return CheckResult::warn(CHECK_MEMORY, format!("memory probe unavailable: {}", e)),
        };
        let ratio = sample.ratio();
        crate::metrics::set_memory_ratio(ratio);

        let level = MemoryPressure::from_ratio(ratio, thresholds.memory_warn_ratio, thresholds.memory_fail_ratio);
        let message = match level.to_error(ratio, thresholds.memory_fail_ratio) {
            Some(err) => err.to_string(),
            None => format!("memory at {:.1}%", ratio * 100.0),
        };
        CheckResult::new(CHECK_MEMORY, level.check_status()).with_message(message)
    }

    fn probe_dependencies(&self) -> CheckResult {
        let backend = self.cache.store().backend_name();
        if self.orchestrator.aggregator_count() == 0 {
            CheckResult::warn(CHECK_DEPENDENCIES, format!("cache={}, no aggregators registered", backend))
        } else {
            CheckResult::pass(CHECK_DEPENDENCIES).with_message(format!(
                "cache={}, aggregators={}",
                backend,
                self.orchestrator.aggregator_count()
            ))
        }
    }

    async fn probe_sync(&self, thresholds: &HealthThresholds) -> CheckResult {
        let status = self.orchestrator.status();
        let failures = status.consecutive_failures;
        let message = format!(
            "running={}, cycles={}, consecutive_failures={}",
            status.running, status.cycle_count, failures
        );

        match FailureSeverity::classify(failures, thresholds.failures_warn, thresholds.failures_critical) {
            FailureSeverity::Healthy => CheckResult::pass(CHECK_SYNC).with_message(message),
            FailureSeverity::Degraded => CheckResult::warn(CHECK_SYNC, message),
            FailureSeverity::Critical => CheckResult::fail(CHECK_SYNC, message),
        }
    }
}
