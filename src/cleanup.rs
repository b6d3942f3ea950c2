// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retention and cleanup jobs.
//!
//! | Job | Work |
//! |---|---|
//! | hourly | prune expired alerts, delete `health:probe:*` and `temp:*` |
//! | daily | prune old cycle history, refresh hot-key TTLs |
//! | weekly | archive cycle metrics (best effort) |
//! | emergency | wipe the store and ask the backend to release memory |
//!
//! The emergency path may run while a sync cycle is in flight. The cycle's
//! next writes land on an empty store, which is fine: it rewrites every key
//! it owns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::AlertLog;
use crate::cache::client::CacheClient;
use crate::cache::keys::{self, KeyClass, ENTITY_SNAPSHOT_MIN_SECS};
use crate::config::RetentionConfig;
use crate::error::SyncError;
use crate::sync::orchestrator::SyncOrchestrator;

/// Archived metrics are kept for a week
pub const ARCHIVE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupKind {
    Hourly,
    Daily,
    Weekly,
    Emergency,
}

impl CleanupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one cleanup run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub alerts_pruned: usize,
    pub keys_deleted: u64,
    pub history_pruned: usize,
    pub keys_refreshed: usize,
    pub archived_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyReport {
    pub keys_cleared: u64,
}

pub struct CleanupManager {
    cache: CacheClient,
    alerts: Arc<AlertLog>,
    orchestrator: Arc<SyncOrchestrator>,
    retention: RetentionConfig,
    sync_interval: Duration,
}

impl CleanupManager {
    pub fn new(
        cache: CacheClient,
        alerts: Arc<AlertLog>,
        orchestrator: Arc<SyncOrchestrator>,
        retention: RetentionConfig,
        sync_interval: Duration,
    ) -> Self {
        Self {
            cache,
            alerts,
            orchestrator,
            retention,
            sync_interval,
        }
    }

    /// Run one job, recording its outcome.
    pub async fn run(&self, kind: CleanupKind) -> Result<CleanupReport, SyncError> {
        let result = match kind {
            CleanupKind::Hourly => self.hourly().await,
            CleanupKind::Daily => self.daily().await,
            CleanupKind::Weekly => self.weekly().await,
            CleanupKind::Emergency => self.emergency().await.map(|e| CleanupReport {
                keys_deleted: e.keys_cleared,
                ..CleanupReport::default()
            }),
        };

        match &result {
            Ok(report) => {
                crate::metrics::record_cleanup_run(kind.as_str(), "success");
                debug!(job = %kind, ?report, "Cleanup finished");
            }
            Err(e) => {
                crate::metrics::record_cleanup_run(kind.as_str(), "failure");
                warn!(job = %kind, error = %e, "Cleanup failed");
            }
        }
        result
    }

    #[instrument(skip(self))]
    pub async fn hourly(&self) -> Result<CleanupReport, SyncError> {
        let alerts_pruned = self.alerts.prune_expired(Utc::now()).await?;

        let store = self.cache.store();
        let mut keys_deleted = 0;
        for pattern in [keys::HEALTH_PROBE_PATTERN, keys::TEMP_PATTERN] {
            keys_deleted += store.delete_pattern(pattern).await?;
        }

        Ok(CleanupReport {
            alerts_pruned,
            keys_deleted,
            ..CleanupReport::default()
        })
    }

    #[instrument(skip(self))]
    pub async fn daily(&self) -> Result<CleanupReport, SyncError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention.metrics_retention_days));
        let history_pruned = self.orchestrator.prune_history(cutoff).await;
        let keys_refreshed = self.refresh_hot_keys().await;

        Ok(CleanupReport {
            history_pruned,
            keys_refreshed,
            ..CleanupReport::default()
        })
    }

    /// Re-write each allowlisted key with a fresh tier TTL so it never goes
    /// cold between cycles. Missing keys are skipped; per-key errors are logged.
    async fn refresh_hot_keys(&self) -> usize {
        let mut refreshed = 0;
        for key in &self.retention.hot_keys {
            let value = match self.cache.get::<Value>(key).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    crate::metrics::record_hot_key_refresh("missing");
                    continue;
                }
                Err(e) => {
                    crate::metrics::record_hot_key_refresh("error");
                    warn!(key = %key, error = %e, "Hot key read failed");
                    continue;
                }
            };

            let ttl = KeyClass::of(key).ttl_for(self.sync_interval, Duration::from_secs(ENTITY_SNAPSHOT_MIN_SECS));
            match self.cache.set(key, &value, ttl).await {
                Ok(()) => {
                    crate::metrics::record_hot_key_refresh("refreshed");
                    refreshed += 1;
                }
                Err(e) => {
                    crate::metrics::record_hot_key_refresh("error");
                    warn!(key = %key, error = %e, "Hot key rewrite failed");
                }
            }
        }
        refreshed
    }

    #[instrument(skip(self))]
    pub async fn weekly(&self) -> Result<CleanupReport, SyncError> {
        let now = Utc::now();
        let key = keys::archive_sync_metrics(now.date_naive());
        let archive = json!({
            "archived_at": now,
            "metrics": self.orchestrator.cycle_metrics(),
            "cycles": self.orchestrator.history(),
        });
        self.cache
            .set(&key, &archive, Duration::from_secs(ARCHIVE_TTL_SECS))
            .await?;
        info!(key = %key, "Cycle metrics archived");

        Ok(CleanupReport {
            archived_key: Some(key),
            ..CleanupReport::default()
        })
    }

    /// Wipe the store. Compaction afterwards is best effort.
    #[instrument(skip(self))]
    pub async fn emergency(&self) -> Result<EmergencyReport, SyncError> {
        let store = self.cache.store();
        let keys_cleared = store.clear_all().await?;
        if let Err(e) = store.compact().await {
            warn!(error = %e, "Compaction after emergency eviction failed");
        }

        crate::metrics::record_emergency_eviction(keys_cleared);
        error!(keys_cleared, backend = store.backend_name(), "Emergency eviction cleared the cache");
        Ok(EmergencyReport { keys_cleared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, Severity};
    use crate::config::{FetchConfig, HealthThresholds, OrchestratorConfig};
    use crate::storage::memory::InMemoryStore;
    use crate::storage::traits::CacheStore;
    use crate::sync::state::SyncCycle;
    use crate::upstream::client::{FetchClient, UpstreamApi};
    use crate::upstream::types::{PageRequest, PageResponse, UpstreamError};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl UpstreamApi for Offline {
        async fn query_page(&self, _request: PageRequest) -> Result<PageResponse, UpstreamError> {
            Err(UpstreamError::Unavailable("offline".into()))
        }

        async fn ping(&self) -> Result<(), UpstreamError> {
            Err(UpstreamError::Unavailable("offline".into()))
        }
    }

    struct Fixture {
        manager: CleanupManager,
        store: Arc<InMemoryStore>,
        alerts: Arc<AlertLog>,
        orchestrator: Arc<SyncOrchestrator>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let cache = CacheClient::new(store.clone());
        let fetcher = Arc::new(FetchClient::new(Arc::new(Offline), FetchConfig::test()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            fetcher,
            cache.clone(),
            vec![],
            OrchestratorConfig::default(),
            Duration::from_secs(60),
            &HealthThresholds::default(),
        ));
        let retention = RetentionConfig {
            alert_retention_secs: 3600,
            ..RetentionConfig::default()
        };
        let alerts = Arc::new(AlertLog::new(cache.clone(), retention.clone()));
        let manager = CleanupManager::new(cache, alerts.clone(), orchestrator.clone(), retention, Duration::from_secs(60));
        Fixture { manager, store, alerts, orchestrator }
    }

    async fn put(store: &InMemoryStore, key: &str, ttl_secs: u64) {
        store.set(key, &json!({"k": key}), Duration::from_secs(ttl_secs)).await.unwrap();
    }

    #[tokio::test]
    async fn test_hourly_prunes_alerts_and_scratch_keys() {
        let f = fixture();
        put(&f.store, "health:probe:abc", 60).await;
        put(&f.store, "temp:import", 60).await;
        put(&f.store, "dashboard:summary", 60).await;
        let stale = Alert::new("low_stock", Severity::High, "sku:1")
            .with_timestamp(Utc::now() - chrono::Duration::hours(3));
        f.alerts.raise("inventory", stale).await.unwrap();

        let report = f.manager.run(CleanupKind::Hourly).await.unwrap();
        assert_eq!(report.alerts_pruned, 1);
        assert_eq!(report.keys_deleted, 2);
        assert!(f.store.exists("dashboard:summary").await.unwrap());
        assert!(!f.store.exists("temp:import").await.unwrap());
    }

    #[tokio::test]
    async fn test_daily_refreshes_hot_keys_with_tier_ttl() {
        let f = fixture();
        put(&f.store, "dashboard:sales", 5).await;
        put(&f.store, "dashboard:summary", 5).await;

        let report = f.manager.daily().await.unwrap();
        assert_eq!(report.keys_refreshed, 2);

        let sales = f.store.ttl_remaining("dashboard:sales").await.unwrap().unwrap();
        assert!(sales > Duration::from_secs(290));
        let summary = f.store.ttl_remaining("dashboard:summary").await.unwrap().unwrap();
        assert!(summary > Duration::from_secs(50) && summary <= Duration::from_secs(60));
        // Missing hot keys are not created
        assert!(!f.store.exists("dashboard:inventory").await.unwrap());
    }

    #[tokio::test]
    async fn test_daily_prunes_old_history() {
        let f = fixture();
        // Offline upstream: one failed cycle lands in history
        f.orchestrator.run_cycle().await;
        assert_eq!(f.orchestrator.history().len(), 1);

        // Inside the retention window: kept
        let report = f.manager.daily().await.unwrap();
        assert_eq!(report.history_pruned, 0);
        assert_eq!(f.orchestrator.history().len(), 1);

        // Past it: dropped from memory and from the persisted copy
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(f.orchestrator.prune_history(later).await, 1);
        let persisted: Vec<SyncCycle> = CacheClient::new(f.store.clone())
            .get(keys::SYNC_METRICS_HISTORY)
            .await
            .unwrap()
            .unwrap();
        assert!(persisted.is_empty());
    }

    #[tokio::test]
    async fn test_weekly_archives_metrics() {
        let f = fixture();
        f.orchestrator.run_cycle().await;

        let report = f.manager.weekly().await.unwrap();
        let key = report.archived_key.unwrap();
        assert!(key.starts_with("archive:sync_metrics:"));

        let archived = f.store.get(&key).await.unwrap().unwrap();
        assert_eq!(archived["metrics"]["total"], 1);
        assert_eq!(archived["metrics"]["failures"], 1);
        assert!(f.store.ttl_remaining(&key).await.unwrap().unwrap() > Duration::from_secs(6 * 24 * 3600));
    }

    #[tokio::test]
    async fn test_emergency_clears_everything() {
        let f = fixture();
        put(&f.store, "dashboard:summary", 60).await;
        put(&f.store, "orders:latest", 900).await;

        let report = f.manager.emergency().await.unwrap();
        assert_eq!(report.keys_cleared, 2);
        assert!(f.store.get("dashboard:summary").await.unwrap().is_none());

        let via_run = f.manager.run(CleanupKind::Emergency).await.unwrap();
        assert_eq!(via_run.keys_deleted, 0);
    }
}
