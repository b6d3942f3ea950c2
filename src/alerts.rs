//! Capped, TTL-bound alert lists.
//!
//! Domain producers (stock-level checks and the like) append [`Alert`]s to
//! `alerts:<category>`. Each list keeps the newest `max_alerts_per_category`
//! entries and is rewritten with the alerts TTL on every raise; the hourly
//! cleanup job drops entries older than the retention window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cache::client::CacheClient;
use crate::cache::keys::{self, ALERTS_TTL_SECS};
use crate::config::RetentionConfig;
use crate::storage::traits::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub subject_key: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// New alert stamped now.
    pub fn new(alert_type: impl Into<String>, severity: Severity, subject_key: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            subject_key: subject_key.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

pub struct AlertLog {
    cache: CacheClient,
    retention: RetentionConfig,
    /// Categories raised by this process; the prune pass walks these.
    categories: DashSet<String>,
}

impl AlertLog {
    pub fn new(cache: CacheClient, retention: RetentionConfig) -> Self {
        Self {
            cache,
            retention,
            categories: DashSet::new(),
        }
    }

    /// Append `alert` to its category, keeping the newest entries.
    /// Returns the list length after the write.
    #[instrument(skip(self, alert), fields(severity = alert.severity.as_str()))]
    pub async fn raise(&self, category: &str, alert: Alert) -> Result<usize, StorageError> {
        let key = keys::alerts(category);
        let mut list: Vec<Alert> = self.cache.get(&key).await?.unwrap_or_default();
        let severity = alert.severity;
        list.push(alert);

        let cap = self.retention.max_alerts_per_category.max(1);
        if list.len() > cap {
            let overflow = list.len() - cap;
            list.drain(..overflow);
        }

        self.cache
            .set(&key, &list, Duration::from_secs(ALERTS_TTL_SECS))
            .await?;
        self.categories.insert(category.to_string());
        crate::metrics::record_alert_raised(category, severity.as_str());
        debug!(category, len = list.len(), "Alert raised");
        Ok(list.len())
    }

    /// Alerts in a category, oldest first. Missing or expired lists are empty.
    pub async fn list(&self, category: &str) -> Result<Vec<Alert>, StorageError> {
        Ok(self.cache.get(&keys::alerts(category)).await?.unwrap_or_default())
    }

    /// Categories this process has raised into.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.categories.iter().map(|c| c.key().clone()).collect();
        categories.sort();
        categories
    }

    /// Drop alerts older than the retention window from every known
    /// category. Lists left empty are deleted. Returns alerts removed.
    #[instrument(skip(self))]
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let retention = chrono::Duration::seconds(self.retention.alert_retention_secs as i64);
        let cutoff = now - retention;
        let mut pruned = 0;

        for category in self.categories() {
            let key = keys::alerts(&category);
            let Some(list) = self.cache.get::<Vec<Alert>>(&key).await? else {
                // List expired on its own
                self.categories.remove(&category);
                continue;
            };

            let before = list.len();
            let kept: Vec<Alert> = list.into_iter().filter(|a| a.timestamp > cutoff).collect();
            if kept.len() == before {
                continue;
            }
            pruned += before - kept.len();

            if kept.is_empty() {
                self.cache.del(&key).await?;
                self.categories.remove(&category);
            } else {
                // Keep the list's remaining lifetime rather than extending it
                let ttl = self
                    .cache
                    .store()
                    .ttl_remaining(&key)
                    .await?
                    .filter(|ttl| ttl.as_secs() > 0)
                    .unwrap_or(Duration::from_secs(ALERTS_TTL_SECS));
                self.cache.set(&key, &kept, ttl).await?;
            }
        }

        crate::metrics::record_alerts_pruned(pruned);
        Ok(pruned)
    }
}
