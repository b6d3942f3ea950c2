// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Memory pressure levels.
//!
//! The health monitor reduces the process memory ratio to one of three
//! levels. Only `Critical` breaches the failure threshold, and only a
//! `Critical` memory check can trigger emergency eviction.
//!
//! # Example
//!
//! ```
//! use commerce_sync::pressure::MemoryPressure;
//!
//! // Default thresholds: warn above 80%, fail above 90%
//! assert_eq!(MemoryPressure::from_ratio(0.50, 0.80, 0.90), MemoryPressure::Normal);
//! assert_eq!(MemoryPressure::from_ratio(0.85, 0.80, 0.90), MemoryPressure::Elevated);
//!
//! let level = MemoryPressure::from_ratio(0.92, 0.80, 0.90);
//! assert_eq!(level, MemoryPressure::Critical);
//! assert!(level.requires_emergency());
//! ```

use crate::error::SyncError;
use crate::health::types::CheckStatus;

/// Memory pressure derived from the used/total ratio.
///
/// - **Normal** (≤ warn): nothing to do
/// - **Elevated** (warn, fail]: health degrades, no action
/// - **Critical** (> fail): health fails, emergency eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal = 0,
    Elevated = 1,
    Critical = 2,
}

impl MemoryPressure {
    /// Calculate the level from a ratio in `0.0..=1.0`. Thresholds are exclusive.
    #[must_use]
    pub fn from_ratio(ratio: f64, warn_ratio: f64, fail_ratio: f64) -> Self {
        match ratio {
            r if r > fail_ratio => Self::Critical,
            r if r > warn_ratio => Self::Elevated,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub fn check_status(&self) -> CheckStatus {
        match self {
            Self::Normal => CheckStatus::Pass,
            Self::Elevated => CheckStatus::Warn,
            Self::Critical => CheckStatus::Fail,
        }
    }

    #[must_use]
    pub fn requires_emergency(&self) -> bool {
        matches!(self, Self::Critical)
    }

    /// The pressure as an error, if it breaches the failure threshold.
    #[must_use]
    pub fn to_error(&self, ratio: f64, fail_ratio: f64) -> Option<SyncError> {
        self.requires_emergency()
            .then_some(SyncError::ResourcePressure { ratio, limit: fail_ratio })
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Memory usage normal",
            Self::Elevated => "Memory usage elevated",
            Self::Critical => "Memory usage critical - emergency eviction",
        }
    }
}

impl std::fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
