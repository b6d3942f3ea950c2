// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the commerce sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `commerce_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: orders, products, customers
//! - `operation`: get, set, delete, exists, clear
//! - `outcome`: success, failure, skipped, hit, miss, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// SYNC CYCLES
// ═══════════════════════════════════════════════════════════════════════════

/// Record a closed sync cycle
pub fn record_cycle(outcome: &str, duration: Duration) {
    counter!(
        "commerce_sync_cycles_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("commerce_sync_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a trigger dropped by the single-flight guard
pub fn record_skipped_trigger(source: &str) {
    counter!(
        "commerce_sync_triggers_skipped_total",
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn set_consecutive_failures(count: u32) {
    gauge!("commerce_sync_consecutive_failures").set(count as f64);
}

pub fn set_cycle_running(running: bool) {
    gauge!("commerce_sync_cycle_running").set(if running { 1.0 } else { 0.0 });
}

/// Record an aggregate written to the cache during a cycle
pub fn record_aggregate_written(class: &str) {
    counter!(
        "commerce_sync_aggregates_written_total",
        "class" => class.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// UPSTREAM FETCH
// ═══════════════════════════════════════════════════════════════════════════

/// Record one upstream page call
pub fn record_page_call(entity: &str, outcome: &str, duration: Duration) {
    counter!(
        "commerce_sync_page_calls_total",
        "entity" => entity.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "commerce_sync_page_seconds",
        "entity" => entity.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_page_retry(entity: &str) {
    counter!(
        "commerce_sync_page_retries_total",
        "entity" => entity.to_string()
    )
    .increment(1);
}

/// Record a `fetch_all` that stopped before the upstream ran out of records
pub fn record_truncated_fetch(entity: &str, reason: &str) {
    counter!(
        "commerce_sync_fetch_truncated_total",
        "entity" => entity.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_records_fetched(entity: &str, count: usize) {
    counter!(
        "commerce_sync_records_fetched_total",
        "entity" => entity.to_string()
    )
    .increment(count as u64);
}

pub fn set_rate_limit_remaining(remaining: u32) {
    gauge!("commerce_sync_upstream_rate_limit_remaining").set(remaining as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_cache_operation(operation: &str, outcome: &str) {
    counter!(
        "commerce_sync_cache_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_cache_latency(operation: &str, duration: Duration) {
    histogram!(
        "commerce_sync_cache_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a cache-aside read served by the factory because the cache failed
pub fn record_cache_fallback(stage: &str) {
    counter!(
        "commerce_sync_cache_fallback_total",
        "stage" => stage.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// HEALTH & CLEANUP
// ═══════════════════════════════════════════════════════════════════════════

/// Set overall health (0 = healthy, 1 = degraded, 2 = unhealthy)
pub fn set_health_status(level: u8) {
    gauge!("commerce_sync_health_status").set(level as f64);
}

pub fn set_check_status(check: &str, level: u8) {
    gauge!(
        "commerce_sync_health_check_status",
        "check" => check.to_string()
    )
    .set(level as f64);
}

/// Set memory pressure ratio (0.0 - 1.0)
pub fn set_memory_ratio(ratio: f64) {
    gauge!("commerce_sync_memory_ratio").set(ratio);
}

pub fn record_probe_latency(check: &str, duration: Duration) {
    histogram!(
        "commerce_sync_probe_seconds",
        "check" => check.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_emergency_eviction(keys_cleared: u64) {
    counter!("commerce_sync_emergency_evictions_total").increment(1);
    counter!("commerce_sync_emergency_evicted_keys_total").increment(keys_cleared);
}

pub fn record_cleanup_run(job: &str, outcome: &str) {
    counter!(
        "commerce_sync_cleanup_runs_total",
        "job" => job.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_alerts_pruned(count: usize) {
    counter!("commerce_sync_alerts_pruned_total").increment(count as u64);
}

pub fn record_alert_raised(category: &str, severity: &str) {
    counter!(
        "commerce_sync_alerts_raised_total",
        "category" => category.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

pub fn record_hot_key_refresh(outcome: &str) {
    counter!(
        "commerce_sync_hot_key_refresh_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_task_tick(task: &str) {
    counter!(
        "commerce_sync_scheduler_ticks_total",
        "task" => task.to_string()
    )
    .increment(1);
}

/// A timing guard that records cache latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_cache_latency(self.operation, self.start.elapsed());
    }
}
