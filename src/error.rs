// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine-level error taxonomy.
//!
//! Every failure that crosses a component boundary is one of these variants.
//! Retry and abort decisions are made on the variant alone:
//!
//! | Variant | Raised by | Handling |
//! |---|---|---|
//! | `TransientUpstream` | fetch client | retried with backoff, absorbed as truncation |
//! | `FatalUpstream` | fetch client | aborts the cycle |
//! | `CacheBackend` | cache store | logged, never fails a read |
//! | `ResourcePressure` | health monitor | triggers emergency cleanup |
//! | `Aggregation` | aggregation adapter | aborts the cycle |
//! | `UpstreamUnreachable` | orchestrator probe | fails the cycle before fetching |
//! | `Deadline` | orchestrator | fails a cycle that outlived its timeout |

use thiserror::Error;

use crate::storage::traits::StorageError;
use crate::upstream::types::{EntityKind, ErrorClass, UpstreamError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Rate limit or timeout from the upstream API.
    #[error("transient upstream error: {0}")]
    TransientUpstream(UpstreamError),

    /// Authentication or query validation failure from the upstream API.
    #[error("fatal upstream error: {0}")]
    FatalUpstream(UpstreamError),

    #[error("cache backend error: {0}")]
    CacheBackend(String),

    /// Memory ratio breached the failure threshold.
    #[error("resource pressure: memory at {pct:.1}% (limit {limit_pct:.1}%)", pct = .ratio * 100.0, limit_pct = .limit * 100.0)]
    ResourcePressure { ratio: f64, limit: f64 },

    #[error("aggregation '{aggregator}' failed: {message}")]
    Aggregation { aggregator: String, message: String },

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("cycle exceeded deadline of {0:?}")]
    Deadline(std::time::Duration),

    /// Fetch returned partial results and truncation counts as failure.
    #[error("fetch truncated for {0:?}")]
    Truncated(Vec<EntityKind>),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether a caller may retry the operation that produced this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream(_) | Self::UpstreamUnreachable(_))
    }

    /// Short stable label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientUpstream(_) => "transient_upstream",
            Self::FatalUpstream(_) => "fatal_upstream",
            Self::CacheBackend(_) => "cache_backend",
            Self::ResourcePressure { .. } => "resource_pressure",
            Self::Aggregation { .. } => "aggregation",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::Deadline(_) => "deadline",
            Self::Truncated(_) => "truncated",
            Self::Config(_) => "config",
        }
    }
}

impl From<UpstreamError> for SyncError {
    fn from(err: UpstreamError) -> Self {
        match err.classify() {
            ErrorClass::Retryable => Self::TransientUpstream(err),
            ErrorClass::Fatal => Self::FatalUpstream(err),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::CacheBackend(err.to_string())
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
