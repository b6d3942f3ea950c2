// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator: one fetch → aggregate → cache-write cycle at a time.
//!
//! # State machine
//!
//! ```text
//!            try_acquire ok                   body Ok
//!   Idle ────────────────────► Running ─────────────────► Idle(Success)
//!    ▲  │                         │      body Err / deadline
//!    │  └─ guard held: Skipped    └─────────────────────► Idle(Failure)
//!    └──────────────────────── guard dropped ◄────────────────┘
//! ```
//!
//! The single-flight guard is an `AtomicBool` taken with `compare_exchange`.
//! A trigger that loses the race is dropped, not queued. Errors inside the
//! body never escape: they close the cycle as a `Failure`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::state::{CycleMetrics, CycleOutcome, FailureSeverity, SyncCycle, SyncState, SyncStatus};
use crate::aggregation::{required_entities, Aggregator, RawSnapshot};
use crate::cache::client::CacheClient;
use crate::cache::keys::{self, KeyClass};
use crate::config::{HealthThresholds, OrchestratorConfig};
use crate::error::SyncError;
use crate::upstream::client::{FetchClient, Truncation};
use crate::upstream::types::{EntityKind, QueryFilter};

/// Result of asking for a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Completed(SyncCycle),
    /// Another cycle was running; nothing happened.
    Skipped,
}

impl TriggerOutcome {
    #[must_use]
    pub fn cycle(&self) -> Option<&SyncCycle> {
        match self {
            Self::Completed(cycle) => Some(cycle),
            Self::Skipped => None,
        }
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Releases the single-flight flag on every exit path.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// What a successful body produced.
#[derive(Debug, Default)]
struct CycleReport {
    truncated: Vec<(EntityKind, Truncation)>,
    aggregates_written: usize,
}

pub struct SyncOrchestrator {
    fetcher: Arc<FetchClient>,
    cache: CacheClient,
    aggregators: Vec<Arc<dyn Aggregator>>,
    config: OrchestratorConfig,
    sync_interval: Duration,
    failures_warn: u32,
    failures_critical: u32,
    filter: QueryFilter,
    state: RwLock<SyncState>,
    in_flight: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<FetchClient>,
        cache: CacheClient,
        aggregators: Vec<Arc<dyn Aggregator>>,
        config: OrchestratorConfig,
        sync_interval: Duration,
        thresholds: &HealthThresholds,
    ) -> Self {
        let history_size = config.history_size;
        Self {
            fetcher,
            cache,
            aggregators,
            config,
            sync_interval,
            failures_warn: thresholds.failures_warn,
            failures_critical: thresholds.failures_critical,
            filter: QueryFilter::default(),
            state: RwLock::new(SyncState::new(history_size)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Filter applied to every entity fetch.
    #[must_use]
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn aggregator_count(&self) -> usize {
        self.aggregators.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Triggers
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one cycle to completion, or return `Skipped` if one is in flight.
    pub async fn run_cycle(&self) -> TriggerOutcome {
        match self.try_acquire() {
            Some(guard) => TriggerOutcome::Completed(self.run_acquired(guard).await),
            None => {
                self.note_skipped("run_cycle");
                TriggerOutcome::Skipped
            }
        }
    }

    /// Start a cycle on the runtime and return immediately.
    ///
    /// The guard is taken before spawning, so a `None` here means the
    /// trigger was dropped.
    pub fn trigger_in_background(self: &Arc<Self>) -> Option<JoinHandle<SyncCycle>> {
        let Some(guard) = self.try_acquire() else {
            self.note_skipped("background");
            return None;
        };
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run_acquired(guard).await }))
    }

    fn try_acquire(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    fn note_skipped(&self, source: &str) {
        crate::metrics::record_skipped_trigger(source);
        info!(source, "Sync already running, trigger dropped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cycle
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self, guard))]
    async fn run_acquired(&self, guard: InFlightGuard) -> SyncCycle {
        let start = self.state.write().begin();
        let cycle_id = start.cycle_id;
        crate::metrics::set_cycle_running(true);
        info!(cycle_id, "Sync cycle started");

        let result = match self.config.cycle_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, self.cycle_body(cycle_id))
                .await
                .unwrap_or(Err(SyncError::Deadline(deadline))),
            None => self.cycle_body(cycle_id).await,
        };

        let (outcome, error_message, truncated, written) = match result {
            Ok(report) => {
                let truncated: Vec<EntityKind> = report.truncated.iter().map(|(e, _)| *e).collect();
                if !truncated.is_empty() && self.config.treat_truncation_as_failure {
                    let err = SyncError::Truncated(truncated.clone());
                    (CycleOutcome::Failure, Some(err.to_string()), truncated, report.aggregates_written)
                } else {
                    (CycleOutcome::Success, None, truncated, report.aggregates_written)
                }
            }
            Err(e) => {
                error!(cycle_id, error = %e, kind = e.kind(), "Sync cycle failed");
                (CycleOutcome::Failure, Some(e.to_string()), Vec::new(), 0)
            }
        };

        let cycle = start.close(outcome, error_message, truncated, written);

        // Persist while still `running`, so status and the single-flight flag
        // flip together once `finish` runs.
        let (consecutive_failures, history) = {
            let state = self.state.read();
            let failures = match outcome {
                CycleOutcome::Success => 0,
                CycleOutcome::Failure => state.consecutive_failures().saturating_add(1),
            };
            let mut history = state.history().clone();
            history.push(cycle.clone());
            (failures, history.to_vec())
        };
        if outcome == CycleOutcome::Failure {
            self.persist_failure(&cycle, consecutive_failures).await;
        }
        self.persist_history(&history).await;

        let consecutive_failures = {
            let mut state = self.state.write();
            state.finish(cycle.clone());
            state.consecutive_failures()
        };
        drop(guard);

        crate::metrics::set_cycle_running(false);
        crate::metrics::record_cycle(outcome.as_str(), Duration::from_millis(cycle.duration_ms));
        crate::metrics::set_consecutive_failures(consecutive_failures);

        if outcome == CycleOutcome::Failure {
            if FailureSeverity::classify(consecutive_failures, self.failures_warn, self.failures_critical)
                == FailureSeverity::Critical
            {
                error!(cycle_id, consecutive_failures, "Sync failure streak is critical");
            }
        } else {
            info!(
                cycle_id,
                duration_ms = cycle.duration_ms,
                aggregates = cycle.aggregates_written,
                "Sync cycle succeeded"
            );
        }
        cycle
    }

    async fn cycle_body(&self, cycle_id: u64) -> Result<CycleReport, SyncError> {
        // Cheap reachability check first: an unreachable upstream fails the cycle without fetching
        self.fetcher
            .ping()
            .await
            .map_err(|e| SyncError::UpstreamUnreachable(e.to_string()))?;

        let entities = required_entities(&self.aggregators);
        let fetches = entities.iter().map(|&entity| async move {
            self.fetcher
                .fetch_entity::<Value>(entity, &self.filter)
                .await
                .map(|outcome| (entity, outcome))
                .map_err(SyncError::from)
        });
        let fetched = try_join_all(fetches).await?;

        let mut report = CycleReport::default();
        let mut snapshot = RawSnapshot::new();
        let snapshot_ttl = self.ttl(KeyClass::EntitySnapshot);

        for (entity, outcome) in fetched {
            if let Some(reason) = outcome.truncated {
                report.truncated.push((entity, reason));
            }
            let payload = json!({
                "cycle_id": cycle_id,
                "fetched_at": Utc::now(),
                "partial": outcome.truncated.is_some(),
                "records": &outcome.records,
            });
            self.cache.set(&keys::entity_latest(entity), &payload, snapshot_ttl).await?;
            snapshot.insert(entity, outcome.records, outcome.truncated.is_some());
        }

        for aggregator in &self.aggregators {
            let aggregates = aggregator.aggregate(&snapshot).map_err(|e| SyncError::Aggregation {
                aggregator: aggregator.name().to_string(),
                message: e.message,
            })?;

            for aggregate in aggregates {
                aggregate.check_tier().map_err(|e| SyncError::Aggregation {
                    aggregator: aggregator.name().to_string(),
                    message: e.message,
                })?;
                let ttl = self.ttl(aggregate.class);
                self.cache.set(&aggregate.key, &aggregate.value, ttl).await?;
                crate::metrics::record_aggregate_written(aggregate.class.as_str());
                debug!(key = %aggregate.key, ttl_secs = ttl.as_secs(), "Aggregate written");
                report.aggregates_written += 1;
            }
        }

        // Marker is stamped together with the data it describes
        let marker = json!({ "cycle_id": cycle_id, "completed_at": Utc::now() });
        self.cache
            .set(keys::SYNC_LAST_SUCCESS, &marker, self.ttl(KeyClass::SyncMarker))
            .await?;

        Ok(report)
    }

    async fn persist_failure(&self, cycle: &SyncCycle, consecutive_failures: u32) {
        let detail = json!({
            "cycle_id": cycle.cycle_id,
            "error": cycle.error_message,
            "failed_at": cycle.finished_at,
            "consecutive_failures": consecutive_failures,
        });
        if let Err(e) = self
            .cache
            .set(keys::SYNC_LAST_FAILURE, &detail, self.ttl(KeyClass::Internal))
            .await
        {
            warn!(cycle_id = cycle.cycle_id, error = %e, "Could not persist failure detail");
        }
    }

    async fn persist_history(&self, history: &[SyncCycle]) {
        if let Err(e) = self
            .cache
            .set(keys::SYNC_METRICS_HISTORY, history, self.ttl(KeyClass::Internal))
            .await
        {
            debug!(error = %e, "Could not persist cycle history");
        }
    }

    fn ttl(&self, class: KeyClass) -> Duration {
        class.ttl_for(
            self.sync_interval,
            Duration::from_secs(self.config.entity_snapshot_ttl_secs),
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries & admin
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.state.read().status()
    }

    #[must_use]
    pub fn cycle_metrics(&self) -> CycleMetrics {
        self.state.read().history().metrics()
    }

    #[must_use]
    pub fn history(&self) -> Vec<SyncCycle> {
        self.state.read().history().to_vec()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.read().running()
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures()
    }

    /// Drop history older than `cutoff` and re-persist what remains.
    pub async fn prune_history(&self, cutoff: DateTime<Utc>) -> usize {
        let (pruned, remaining) = {
            let mut state = self.state.write();
            let pruned = state.history_mut().prune_before(cutoff);
            (pruned, state.history().to_vec())
        };
        if pruned > 0 {
            self.persist_history(&remaining).await;
        }
        pruned
    }

    /// Clear the failure streak without touching `running` or `last_cycle`.
    pub fn reset_failure_count(&self) {
        let previous = {
            let mut state = self.state.write();
            let previous = state.consecutive_failures();
            state.reset_failures();
            previous
        };
        crate::metrics::set_consecutive_failures(0);
        info!(previous, "Sync failure count reset");
    }

    #[must_use]
    pub fn failure_severity(&self) -> FailureSeverity {
        FailureSeverity::classify(self.consecutive_failures(), self.failures_warn, self.failures_critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Aggregate, AggregationError, FnAggregator, RecordCounts};
    use crate::cache::keys::DashboardDomain;
    use crate::config::FetchConfig;
    use crate::storage::memory::InMemoryStore;
    use crate::storage::traits::{CacheStore, StorageError};
    use crate::upstream::client::UpstreamApi;
    use crate::upstream::types::{PageRequest, PageResponse, UpstreamError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Single-page upstream with a switchable ping and optional latency.
    struct StubUpstream {
        reachable: AtomicBool,
        fatal: AtomicBool,
        latency: Duration,
        queries: AtomicUsize,
    }

    impl StubUpstream {
        fn new() -> Self {
            Self {
                reachable: AtomicBool::new(true),
                fatal: AtomicBool::new(false),
                latency: Duration::ZERO,
                queries: AtomicUsize::new(0),
            }
        }

        fn slow(latency: Duration) -> Self {
            Self { latency, ..Self::new() }
        }
    }

    #[async_trait]
    impl UpstreamApi for StubUpstream {
        async fn query_page(&self, _request: PageRequest) -> Result<PageResponse, UpstreamError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.fatal.load(Ordering::SeqCst) {
                return Err(UpstreamError::InvalidQuery("bad filter".into()));
            }
            Ok(PageResponse {
                records: vec![json!({"id": 1}), json!({"id": 2})],
                next_cursor: None,
                has_more: false,
                rate_limit_remaining: None,
            })
        }

        async fn ping(&self) -> Result<(), UpstreamError> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(UpstreamError::Unavailable("connection refused".into()))
            }
        }
    }

    fn orchestrator_with(
        upstream: Arc<StubUpstream>,
        aggregators: Vec<Arc<dyn Aggregator>>,
        config: OrchestratorConfig,
    ) -> (Arc<SyncOrchestrator>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let fetcher = Arc::new(FetchClient::new(upstream, FetchConfig::test()));
        let orchestrator = SyncOrchestrator::new(
            fetcher,
            CacheClient::new(store.clone()),
            aggregators,
            config,
            Duration::from_secs(60),
            &HealthThresholds::default(),
        );
        (Arc::new(orchestrator), store)
    }

    fn orchestrator(upstream: Arc<StubUpstream>) -> (Arc<SyncOrchestrator>, Arc<InMemoryStore>) {
        orchestrator_with(upstream, vec![Arc::new(RecordCounts)], OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_successful_cycle_writes_tiers() {
        let (orch, store) = orchestrator(Arc::new(StubUpstream::new()));

        let outcome = orch.run_cycle().await;
        let cycle = outcome.cycle().unwrap();
        assert!(cycle.is_success());
        assert_eq!(cycle.cycle_id, 1);
        assert_eq!(cycle.aggregates_written, 1);

        let summary = store.entry("dashboard:summary").unwrap();
        assert_eq!(summary.ttl_seconds, 60);
        assert_eq!(summary.value["orders"]["count"], 2);

        assert_eq!(store.entry("orders:latest").unwrap().ttl_seconds, 900);
        assert_eq!(store.entry("sync:last_success").unwrap().ttl_seconds, 120);
        assert!(store.entry("sync:metrics:history").is_some());

        let status = orch.status();
        assert!(!status.running);
        assert_eq!(status.cycle_count, 1);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_fails_without_fetch() {
        let upstream = Arc::new(StubUpstream::new());
        upstream.reachable.store(false, Ordering::SeqCst);
        let (orch, store) = orchestrator(upstream.clone());

        let cycle = orch.run_cycle().await.cycle().cloned().unwrap();
        assert_eq!(cycle.outcome, CycleOutcome::Failure);
        assert!(cycle.error_message.unwrap().contains("unreachable"));
        assert_eq!(upstream.queries.load(Ordering::SeqCst), 0);

        let detail = store.get("sync:last_failure").await.unwrap().unwrap();
        assert_eq!(detail["cycle_id"], 1);
        assert_eq!(detail["consecutive_failures"], 1);
        assert!(store.get("sync:last_success").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fatal_fetch_fails_cycle() {
        let upstream = Arc::new(StubUpstream::new());
        upstream.fatal.store(true, Ordering::SeqCst);
        let (orch, store) = orchestrator(upstream);

        let cycle = orch.run_cycle().await.cycle().cloned().unwrap();
        assert_eq!(cycle.outcome, CycleOutcome::Failure);
        assert!(cycle.error_message.unwrap().contains("invalid query"));
        assert!(store.get("dashboard:summary").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aggregation_error_fails_cycle() {
        let failing: Arc<dyn Aggregator> = Arc::new(FnAggregator::new("churn", &[EntityKind::Customers], |_| {
            Err(AggregationError::new("division by zero"))
        }));
        let (orch, _) = orchestrator_with(Arc::new(StubUpstream::new()), vec![failing], OrchestratorConfig::default());

        let status = {
            orch.run_cycle().await;
            orch.status()
        };
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_error.as_deref(), Some("aggregation 'churn' failed: division by zero"));
    }

    #[tokio::test]
    async fn test_aggregator_cannot_write_marker() {
        let sneaky: Arc<dyn Aggregator> = Arc::new(FnAggregator::new("sneaky", &[EntityKind::Orders], |_| {
            Ok(vec![Aggregate {
                key: "sync:last_success".into(),
                class: KeyClass::SyncMarker,
                value: json!(true),
            }])
        }));
        let (orch, _) = orchestrator_with(Arc::new(StubUpstream::new()), vec![sneaky], OrchestratorConfig::default());

        let cycle = orch.run_cycle().await.cycle().cloned().unwrap();
        assert_eq!(cycle.outcome, CycleOutcome::Failure);
    }

    #[tokio::test]
    async fn test_only_required_entities_fetched() {
        let upstream = Arc::new(StubUpstream::new());
        let inventory: Arc<dyn Aggregator> = Arc::new(FnAggregator::new("inventory", &[EntityKind::Products], |s| {
            Ok(vec![Aggregate::secondary(
                DashboardDomain::Inventory,
                json!({ "skus": s.records(EntityKind::Products).len() }),
            )])
        }));
        let (orch, store) = orchestrator_with(upstream.clone(), vec![inventory], OrchestratorConfig::default());

        orch.run_cycle().await;
        assert_eq!(upstream.queries.load(Ordering::SeqCst), 1);
        assert_eq!(store.entry("dashboard:inventory").unwrap().ttl_seconds, 300);
        assert!(store.entry("orders:latest").is_none());
    }

    #[tokio::test]
    async fn test_failure_counter_resets_on_success() {
        let upstream = Arc::new(StubUpstream::new());
        upstream.reachable.store(false, Ordering::SeqCst);
        let (orch, _) = orchestrator(upstream.clone());

        for _ in 0..3 {
            orch.run_cycle().await;
        }
        assert_eq!(orch.consecutive_failures(), 3);
        assert_eq!(orch.failure_severity(), FailureSeverity::Degraded);

        upstream.reachable.store(true, Ordering::SeqCst);
        orch.run_cycle().await;
        assert_eq!(orch.consecutive_failures(), 0);
        assert_eq!(orch.failure_severity(), FailureSeverity::Healthy);
    }

    #[tokio::test]
    async fn test_reset_failure_count() {
        let upstream = Arc::new(StubUpstream::new());
        upstream.reachable.store(false, Ordering::SeqCst);
        let (orch, _) = orchestrator(upstream);

        for _ in 0..6 {
            orch.run_cycle().await;
        }
        assert_eq!(orch.failure_severity(), FailureSeverity::Critical);

        let last_cycle = orch.status().last_cycle;
        orch.reset_failure_count();
        let status = orch.status();
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_cycle, last_cycle);
        assert_eq!(status.cycle_count, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_trigger_skipped() {
        let (orch, _) = orchestrator(Arc::new(StubUpstream::slow(Duration::from_millis(500))));

        let handle = orch.trigger_in_background().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(orch.is_running());

        assert!(orch.run_cycle().await.is_skipped());
        assert!(orch.trigger_in_background().is_none());

        let cycle = handle.await.unwrap();
        assert!(cycle.is_success());
        assert_eq!(orch.status().cycle_count, 1);

        // Guard released after completion
        assert!(!orch.run_cycle().await.is_skipped());
        assert_eq!(orch.status().cycle_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_forces_failure() {
        let config = OrchestratorConfig {
            cycle_timeout_secs: Some(1),
            ..OrchestratorConfig::default()
        };
        let (orch, _) = orchestrator_with(
            Arc::new(StubUpstream::slow(Duration::from_secs(5))),
            vec![Arc::new(RecordCounts)],
            config,
        );

        let cycle = orch.run_cycle().await.cycle().cloned().unwrap();
        assert_eq!(cycle.outcome, CycleOutcome::Failure);
        assert!(cycle.error_message.unwrap().contains("deadline"));
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_history_metrics() {
        let upstream = Arc::new(StubUpstream::new());
        let (orch, _) = orchestrator(upstream.clone());

        orch.run_cycle().await;
        upstream.reachable.store(false, Ordering::SeqCst);
        orch.run_cycle().await;

        let metrics = orch.cycle_metrics();
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.failures, 1);
        assert_eq!(orch.history().len(), 2);
    }

    #[tokio::test]
    async fn test_mislabelled_aggregate_rejected() {
        let mislabelled: Arc<dyn Aggregator> = Arc::new(FnAggregator::new("mislabelled", &[EntityKind::Orders], |_| {
            Ok(vec![Aggregate {
                key: keys::DASHBOARD_SUMMARY.into(),
                class: KeyClass::Internal,
                value: json!({ "orders": 1 }),
            }])
        }));
        let (orch, store) =
            orchestrator_with(Arc::new(StubUpstream::new()), vec![mislabelled], OrchestratorConfig::default());

        let cycle = orch.run_cycle().await.cycle().cloned().unwrap();
        assert_eq!(cycle.outcome, CycleOutcome::Failure);
        assert!(cycle.error_message.unwrap().contains("declared as internal"));
        assert!(store.entry("dashboard:summary").is_none());
    }

    /// Delays writes of the history key so a cycle can be observed mid-persist.
    struct SlowHistoryStore {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CacheStore for SlowHistoryStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StorageError> {
            if key == keys::SYNC_METRICS_HISTORY {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.exists(key).await
        }

        async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StorageError> {
            self.inner.ttl_remaining(key).await
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
            self.inner.keys(pattern).await
        }

        async fn clear_all(&self) -> Result<u64, StorageError> {
            self.inner.clear_all().await
        }

        async fn ping(&self) -> Result<(), StorageError> {
            self.inner.ping().await
        }

        fn backend_name(&self) -> &'static str {
            "slow-history"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_stays_running_until_persisted() {
        let store = Arc::new(SlowHistoryStore {
            inner: InMemoryStore::new(),
            delay: Duration::from_secs(1),
        });
        let fetcher = Arc::new(FetchClient::new(Arc::new(StubUpstream::new()), FetchConfig::test()));
        let orch = Arc::new(SyncOrchestrator::new(
            fetcher,
            CacheClient::new(store.clone()),
            vec![Arc::new(RecordCounts)],
            OrchestratorConfig::default(),
            Duration::from_secs(60),
            &HealthThresholds::default(),
        ));

        let handle = orch.trigger_in_background().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Body is done, history write is pending: both views agree on running
        assert!(orch.is_running());
        assert!(orch.status().running);
        assert_eq!(orch.status().cycle_count, 1);
        assert!(orch.run_cycle().await.is_skipped());

        let cycle = handle.await.unwrap();
        assert!(cycle.is_success());
        assert!(!orch.status().running);
        assert!(!orch.is_running());

        let history = store.get(keys::SYNC_METRICS_HISTORY).await.unwrap().unwrap();
        assert_eq!(history.as_array().map(Vec::len), Some(1));
        assert_eq!(history[0]["cycle_id"], 1);
        assert_eq!(orch.status().consecutive_failures, 0);
    }
}
