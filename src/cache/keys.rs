//! Cache key namespace and TTL tiers.
//!
//! Every key the engine writes belongs to a [`KeyClass`], and every class
//! maps to a bounded TTL:
//!
//! | Class | Example | TTL |
//! |---|---|---|
//! | `PrimaryAggregate` | `dashboard:summary` | 60s |
//! | `SecondaryAggregate` | `dashboard:sales` | 300s |
//! | `EntitySnapshot` | `orders:latest` | 600–1200s |
//! | `SyncMarker` | `sync:last_success` | max(2 × interval, 120s) |
//! | `Alerts` | `alerts:low_stock` | 900s |
//! | `Internal` | `sync:last_failure` | 24h |
//!
//! The sync interval must never exceed the shortest orchestrator tier,
//! so a healthy engine rewrites each key before it expires.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::upstream::types::EntityKind;

/// TTL of the primary dashboard aggregate, and the upper bound on the sync interval.
pub const PRIMARY_TTL_SECS: u64 = 60;
pub const SECONDARY_TTL_SECS: u64 = 5 * 60;
pub const ENTITY_SNAPSHOT_MIN_SECS: u64 = 10 * 60;
pub const ENTITY_SNAPSHOT_MAX_SECS: u64 = 20 * 60;
pub const ALERTS_TTL_SECS: u64 = 15 * 60;
pub const INTERNAL_TTL_SECS: u64 = 24 * 60 * 60;
/// Floor for the last-success marker TTL
pub const SYNC_MARKER_MIN_SECS: u64 = 120;

pub const DASHBOARD_SUMMARY: &str = "dashboard:summary";
pub const SYNC_LAST_SUCCESS: &str = "sync:last_success";
pub const SYNC_LAST_FAILURE: &str = "sync:last_failure";
pub const SYNC_METRICS_HISTORY: &str = "sync:metrics:history";
pub const HEALTH_PROBE_PATTERN: &str = "health:probe:*";
pub const TEMP_PATTERN: &str = "temp:*";

/// Freshness tier of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyClass {
    PrimaryAggregate,
    SecondaryAggregate,
    /// Raw records per entity; TTL clamped to 600–1200s
    EntitySnapshot,
    SyncMarker,
    Alerts,
    /// Probe keys, failure details, metrics history
    Internal,
}

impl KeyClass {
    /// TTL for this class given the configured sync interval.
    ///
    /// `entity_ttl` is only consulted for `EntitySnapshot` and is clamped to
    /// the tier bounds.
    #[must_use]
    pub fn ttl_for(self, sync_interval: Duration, entity_ttl: Duration) -> Duration {
        match self {
            Self::PrimaryAggregate => Duration::from_secs(PRIMARY_TTL_SECS),
            Self::SecondaryAggregate => Duration::from_secs(SECONDARY_TTL_SECS),
            Self::EntitySnapshot => Duration::from_secs(
                entity_ttl
                    .as_secs()
                    .clamp(ENTITY_SNAPSHOT_MIN_SECS, ENTITY_SNAPSHOT_MAX_SECS),
            ),
            Self::SyncMarker => Duration::from_secs(
                sync_interval.as_secs().saturating_mul(2).max(SYNC_MARKER_MIN_SECS),
            ),
            Self::Alerts => Duration::from_secs(ALERTS_TTL_SECS),
            Self::Internal => Duration::from_secs(INTERNAL_TTL_SECS),
        }
    }

    /// Inclusive TTL bounds accepted for this class.
    #[must_use]
    pub fn bounds(self, sync_interval: Duration) -> (Duration, Duration) {
        match self {
            Self::EntitySnapshot => (
                Duration::from_secs(ENTITY_SNAPSHOT_MIN_SECS),
                Duration::from_secs(ENTITY_SNAPSHOT_MAX_SECS),
            ),
            other => {
                let ttl = other.ttl_for(sync_interval, Duration::ZERO);
                (ttl, ttl)
            }
        }
    }

    /// Class of a key by its name, for keys the engine itself writes.
    #[must_use]
    pub fn of(key: &str) -> Self {
        if key == DASHBOARD_SUMMARY {
            Self::PrimaryAggregate
        } else if key.starts_with("dashboard:") {
            Self::SecondaryAggregate
        } else if key == SYNC_LAST_SUCCESS {
            Self::SyncMarker
        } else if key.starts_with("alerts:") {
            Self::Alerts
        } else if key.ends_with(":latest") {
            Self::EntitySnapshot
        } else {
            Self::Internal
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryAggregate => "primary_aggregate",
            Self::SecondaryAggregate => "secondary_aggregate",
            Self::EntitySnapshot => "entity_snapshot",
            Self::SyncMarker => "sync_marker",
            Self::Alerts => "alerts",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary dashboard aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DashboardDomain {
    Sales,
    Customers,
    Inventory,
    Orders,
}

impl DashboardDomain {
    pub const ALL: [DashboardDomain; 4] = [Self::Sales, Self::Customers, Self::Inventory, Self::Orders];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Customers => "customers",
            Self::Inventory => "inventory",
            Self::Orders => "orders",
        }
    }
}

#[must_use]
pub fn dashboard(domain: DashboardDomain) -> String {
    format!("dashboard:{}", domain.as_str())
}

#[must_use]
pub fn entity_latest(entity: EntityKind) -> String {
    format!("{}:latest", entity.as_str())
}

#[must_use]
pub fn alerts(category: &str) -> String {
    format!("alerts:{}", category)
}

#[must_use]
pub fn health_probe() -> String {
    format!("health:probe:{}", uuid::Uuid::new_v4())
}

#[must_use]
pub fn archive_sync_metrics(date: chrono::NaiveDate) -> String {
    format!("archive:sync_metrics:{}", date.format("%Y-%m-%d"))
}
