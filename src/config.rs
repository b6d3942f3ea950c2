//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use commerce_sync::SyncEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncEngineConfig::default();
//! assert_eq!(config.fetch.page_size_max, 50);
//! assert_eq!(config.schedule.sync_interval_secs, 30);
//!
//! // Override a section
//! let config = SyncEngineConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     key_prefix: Some("shop:".into()),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::keys::PRIMARY_TTL_SECS;
use crate::error::SyncError;
use crate::upstream::types::UPSTREAM_PAGE_LIMIT;

/// Top-level engine configuration.
///
/// Every field has a default, so a config file only needs to name what it
/// changes. Runtime updates are delivered through a `watch` channel handed
/// to [`crate::SyncEngineBuilder::config_updates`]:
///
/// ```rust,no_run
/// # async fn run() -> Result<(), commerce_sync::SyncError> {
/// use commerce_sync::{SyncEngine, SyncEngineConfig};
///
/// let config = SyncEngineConfig::default();
/// let (tx, rx) = tokio::sync::watch::channel(config.clone());
/// let engine = SyncEngine::builder(config.clone()).config_updates(rx).build().await?;
///
/// let mut tuned = config;
/// tuned.health.memory_warn_ratio = 0.7;
/// let _ = tx.send(tuned);
/// # let _ = engine;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEngineConfig {
    /// Redis connection string (e.g., "redis://localhost:6379"). `None` selects
    /// the in-process store.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix applied to every cache key (e.g., "shop:" → "shop:dashboard:summary")
    #[serde(default)]
    pub key_prefix: Option<String>,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub health: HealthThresholds,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream query API endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Pagination, retry and request budget for the fetch client.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Requested page size; always clamped to the upstream limit of 50.
    #[serde(default = "default_page_size_max")]
    pub page_size_max: usize,
    /// Consecutive failures tolerated on one page before giving up on it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff unit: attempt n waits `base_delay_ms * n`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Pause between successful pages (skipped after the last page).
    #[serde(default = "default_inter_page_delay_ms")]
    pub inter_page_delay_ms: u64,
    /// Hard stop on pages per `fetch_all` call.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Hard stop on records per `fetch_all` call.
    #[serde(default = "default_record_cap")]
    pub record_cap: usize,
    /// When the server reports fewer remaining requests than this, the next
    /// inter-page delay is doubled.
    #[serde(default = "default_rate_limit_floor")]
    pub rate_limit_floor: Option<u32>,
}

/// Cadence of each periodic task.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_hourly_secs")]
    pub hourly_cleanup_secs: u64,
    #[serde(default = "default_daily_secs")]
    pub daily_cleanup_secs: u64,
    #[serde(default = "default_weekly_secs")]
    pub weekly_archive_secs: u64,
    /// Run a sync cycle as soon as the engine starts instead of waiting one interval.
    #[serde(default = "default_true")]
    pub sync_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Closed cycles kept for the metrics view
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Upper bound on one cycle; `None` lets a cycle run until it finishes.
    #[serde(default)]
    pub cycle_timeout_secs: Option<u64>,
    /// Count a cycle whose fetches were truncated as a failure.
    #[serde(default)]
    pub treat_truncation_as_failure: bool,
    /// TTL for `<entity>:latest` snapshots, clamped to the 600–1200s tier.
    #[serde(default = "default_entity_snapshot_ttl_secs")]
    pub entity_snapshot_ttl_secs: u64,
}

/// Probe thresholds for the health monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthThresholds {
    #[serde(default = "default_cache_latency_warn_ms")]
    pub cache_latency_warn_ms: u64,
    #[serde(default = "default_cache_latency_fail_ms")]
    pub cache_latency_fail_ms: u64,
    #[serde(default = "default_memory_warn_ratio")]
    pub memory_warn_ratio: f64,
    #[serde(default = "default_memory_fail_ratio")]
    pub memory_fail_ratio: f64,
    /// Memory budget for this process. When set, the memory check compares
    /// resident set size against it instead of system-wide usage.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// Consecutive sync failures that degrade the sync check
    #[serde(default = "default_failures_warn")]
    pub failures_warn: u32,
    /// Consecutive sync failures that fail the sync check (page an operator)
    #[serde(default = "default_failures_critical")]
    pub failures_critical: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_alerts_per_category")]
    pub max_alerts_per_category: usize,
    #[serde(default = "default_alert_retention_secs")]
    pub alert_retention_secs: u64,
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,
    /// Keys re-written with a fresh TTL by the daily job
    #[serde(default = "default_hot_keys")]
    pub hot_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_page_size_max() -> usize { UPSTREAM_PAGE_LIMIT }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_inter_page_delay_ms() -> u64 { 250 }
fn default_max_pages() -> usize { 200 }
fn default_record_cap() -> usize { 10_000 }
fn default_rate_limit_floor() -> Option<u32> { Some(10) }
fn default_sync_interval_secs() -> u64 { 30 }
fn default_health_interval_secs() -> u64 { 30 }
fn default_hourly_secs() -> u64 { 60 * 60 }
fn default_daily_secs() -> u64 { 24 * 60 * 60 }
fn default_weekly_secs() -> u64 { 7 * 24 * 60 * 60 }
fn default_true() -> bool { true }
fn default_history_size() -> usize { 50 }
fn default_entity_snapshot_ttl_secs() -> u64 { 900 }
fn default_cache_latency_warn_ms() -> u64 { 1_000 }
fn default_cache_latency_fail_ms() -> u64 { 5_000 }
fn default_memory_warn_ratio() -> f64 { 0.80 }
fn default_memory_fail_ratio() -> f64 { 0.90 }
fn default_failures_warn() -> u32 { 1 }
fn default_failures_critical() -> u32 { 5 }
fn default_max_alerts_per_category() -> usize { 100 }
fn default_alert_retention_secs() -> u64 { 24 * 60 * 60 }
fn default_metrics_retention_days() -> u32 { 7 }
fn default_log_filter() -> String { "info".to_string() }

fn default_hot_keys() -> Vec<String> {
    vec![
        "dashboard:summary".to_string(),
        "dashboard:sales".to_string(),
        "dashboard:customers".to_string(),
        "dashboard:inventory".to_string(),
        "dashboard:orders".to_string(),
    ]
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size_max: default_page_size_max(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            inter_page_delay_ms: default_inter_page_delay_ms(),
            max_pages: default_max_pages(),
            record_cap: default_record_cap(),
            rate_limit_floor: default_rate_limit_floor(),
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn inter_page_delay(&self) -> Duration {
        Duration::from_millis(self.inter_page_delay_ms)
    }

    /// Near-zero delays for tests
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            base_delay_ms: 1,
            inter_page_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            hourly_cleanup_secs: default_hourly_secs(),
            daily_cleanup_secs: default_daily_secs(),
            weekly_archive_secs: default_weekly_secs(),
            sync_on_start: default_true(),
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            cycle_timeout_secs: None,
            treat_truncation_as_failure: false,
            entity_snapshot_ttl_secs: default_entity_snapshot_ttl_secs(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cache_latency_warn_ms: default_cache_latency_warn_ms(),
            cache_latency_fail_ms: default_cache_latency_fail_ms(),
            memory_warn_ratio: default_memory_warn_ratio(),
            memory_fail_ratio: default_memory_fail_ratio(),
            memory_limit_mb: None,
            failures_warn: default_failures_warn(),
            failures_critical: default_failures_critical(),
        }
    }
}

impl HealthThresholds {
    #[must_use]
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_alerts_per_category: default_max_alerts_per_category(),
            alert_retention_secs: default_alert_retention_secs(),
            metrics_retention_days: default_metrics_retention_days(),
            hot_keys: default_hot_keys(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: None,
            upstream: UpstreamConfig::default(),
            fetch: FetchConfig::default(),
            schedule: ScheduleConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            health: HealthThresholds::default(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncEngineConfig {
    /// Build a config from `COMMERCE_SYNC_*` environment variables layered on defaults.
    ///
    /// # Environment Variables
    /// - `COMMERCE_SYNC_REDIS_URL`, `COMMERCE_SYNC_KEY_PREFIX`
    /// - `COMMERCE_SYNC_UPSTREAM_URL`, `COMMERCE_SYNC_UPSTREAM_TOKEN`
    /// - `COMMERCE_SYNC_INTERVAL_SECS`, `COMMERCE_SYNC_HEALTH_INTERVAL_SECS`
    /// - `COMMERCE_SYNC_PAGE_SIZE`, `COMMERCE_SYNC_MAX_RETRIES`, `COMMERCE_SYNC_RECORD_CAP`
    /// - `COMMERCE_SYNC_CYCLE_TIMEOUT_SECS`, `COMMERCE_SYNC_MEMORY_LIMIT_MB`
    /// - `COMMERCE_SYNC_LOG_FILTER`, `COMMERCE_SYNC_LOG_JSON`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|s| s.trim().parse().ok())
        }

        let mut config = Self::default();

        if let Some(url) = lookup("COMMERCE_SYNC_REDIS_URL") {
            config.redis_url = Some(url);
        }
        if let Some(prefix) = lookup("COMMERCE_SYNC_KEY_PREFIX") {
            config.key_prefix = Some(prefix);
        }
        if let Some(url) = lookup("COMMERCE_SYNC_UPSTREAM_URL") {
            config.upstream.base_url = Some(url);
        }
        if let Some(token) = lookup("COMMERCE_SYNC_UPSTREAM_TOKEN") {
            config.upstream.api_token = Some(token);
        }
        if let Some(secs) = parsed(lookup("COMMERCE_SYNC_INTERVAL_SECS")) {
            config.schedule.sync_interval_secs = secs;
        }
        if let Some(secs) = parsed(lookup("COMMERCE_SYNC_HEALTH_INTERVAL_SECS")) {
            config.schedule.health_interval_secs = secs;
        }
        if let Some(size) = parsed(lookup("COMMERCE_SYNC_PAGE_SIZE")) {
            config.fetch.page_size_max = size;
        }
        if let Some(retries) = parsed(lookup("COMMERCE_SYNC_MAX_RETRIES")) {
            config.fetch.max_retries = retries;
        }
        if let Some(cap) = parsed(lookup("COMMERCE_SYNC_RECORD_CAP")) {
            config.fetch.record_cap = cap;
        }
        if let Some(mb) = parsed(lookup("COMMERCE_SYNC_MEMORY_LIMIT_MB")) {
            config.health.memory_limit_mb = Some(mb);
        }
        if let Some(secs) = parsed(lookup("COMMERCE_SYNC_CYCLE_TIMEOUT_SECS")) {
            config.orchestrator.cycle_timeout_secs = Some(secs);
        }
        if let Some(filter) = lookup("COMMERCE_SYNC_LOG_FILTER") {
            config.logging.filter = filter;
        }
        if let Some(json) = parsed(lookup("COMMERCE_SYNC_LOG_JSON")) {
            config.logging.json = json;
        }

        config
    }

    /// Reject configurations that would break engine invariants.
    ///
    /// The sync interval may not exceed the shortest TTL the orchestrator
    /// writes, otherwise readers would see cold misses between healthy cycles.
    pub fn validate(&self) -> Result<(), SyncError> {
        let fetch = &self.fetch;
        if fetch.page_size_max == 0 {
            return Err(SyncError::Config("fetch.page_size_max must be at least 1".into()));
        }
        if fetch.max_retries == 0 {
            return Err(SyncError::Config("fetch.max_retries must be at least 1".into()));
        }
        if fetch.max_pages == 0 || fetch.record_cap == 0 {
            return Err(SyncError::Config("fetch.max_pages and fetch.record_cap must be positive".into()));
        }

        let interval = self.schedule.sync_interval_secs;
        if interval == 0 {
            return Err(SyncError::Config("schedule.sync_interval_secs must be positive".into()));
        }
        // The primary tier must be refreshed before it expires
        if interval >= PRIMARY_TTL_SECS {
            return Err(SyncError::Config(format!(
                "schedule.sync_interval_secs ({}) must be below the primary aggregate TTL ({}s)",
                interval, PRIMARY_TTL_SECS
            )));
        }
        if self.schedule.health_interval_secs == 0 {
            return Err(SyncError::Config("schedule.health_interval_secs must be positive".into()));
        }

        let health = &self.health;
        if health.cache_latency_warn_ms >= health.cache_latency_fail_ms {
            return Err(SyncError::Config("health.cache_latency_warn_ms must be below cache_latency_fail_ms".into()));
        }
        if !(0.0..=1.0).contains(&health.memory_warn_ratio)
            || !(0.0..=1.0).contains(&health.memory_fail_ratio)
            || health.memory_warn_ratio >= health.memory_fail_ratio
        {
            return Err(SyncError::Config("health memory ratios must satisfy 0 <= warn < fail <= 1".into()));
        }
        if health.failures_warn == 0 || health.failures_warn > health.failures_critical {
            return Err(SyncError::Config("health.failures_warn must be in 1..=failures_critical".into()));
        }

        if self.orchestrator.history_size == 0 {
            return Err(SyncError::Config("orchestrator.history_size must be positive".into()));
        }
        if self.retention.max_alerts_per_category == 0 {
            return Err(SyncError::Config("retention.max_alerts_per_category must be positive".into()));
        }

        Ok(())
    }
}
