//! Wire-level types for the upstream commerce query API.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Largest page the upstream API will serve, regardless of what is requested.
pub const UPSTREAM_PAGE_LIMIT: usize = 50;

/// Entity collections exposed by the upstream query API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Orders,
    Products,
    Customers,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Orders, EntityKind::Products, EntityKind::Customers];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Products => "products",
            Self::Customers => "customers",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query filter forwarded verbatim to the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Free-form search expression (e.g. `"status:open"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl QueryFilter {
    #[must_use]
    pub fn query(expr: impl Into<String>) -> Self {
        Self {
            query: Some(expr.into()),
            ..Self::default()
        }
    }
}

/// One page request. `page_size` is already clamped by the fetch client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRequest {
    pub entity: EntityKind,
    pub page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub filter: QueryFilter,
}

/// One page response as returned by the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageResponse {
    pub records: Vec<Value>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub rate_limit_remaining: Option<u32>,
}

/// A decoded page handed to the caller and dropped immediately after.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage<T> {
    pub records: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub rate_limit_remaining: Option<u32>,
}

impl<T> FetchPage<T> {
    /// More pages exist and the server gave us a way to reach them.
    #[must_use]
    pub fn can_continue(&self) -> bool {
        self.has_more && self.next_cursor.is_some()
    }
}

/// Whether an upstream failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {:?})", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, 5xx, or a similar outage.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Response body did not match the expected record shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Pure function of the variant; message text is never inspected.
    #[must_use]
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Unavailable(_) => ErrorClass::Retryable,
            Self::Auth(_) | Self::InvalidQuery(_) | Self::Decode(_) => ErrorClass::Fatal,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }

    /// Server-provided minimum wait, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short stable label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Auth(_) => "auth",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Decode(_) => "decode",
        }
    }
}
