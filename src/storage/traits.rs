use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error for '{key}': {message}")]
    Serialization { key: String, message: String },
    #[error("Refusing to write '{0}' without a TTL")]
    MissingTtl(String),
}

/// One stored value with its expiry metadata.
///
/// Owned by whichever component last wrote the key; there is no versioning,
/// the last writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub ttl_seconds: u64,
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl_seconds: ttl.as_secs(),
            written_at: Utc::now(),
        }
    }

    /// Time left before expiry, measured against `now`.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = self.written_at + chrono::Duration::seconds(self.ttl_seconds as i64);
        (expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_none()
    }
}

/// Key/value store with per-key TTL.
///
/// Payloads are JSON values so the trait stays object-safe; typed access
/// lives in [`crate::cache::CacheClient`]. Every write carries a TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StorageError>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StorageError>;

    /// Live keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError>;

    /// Delete every key matching `pattern`, returning how many were removed.
    /// Default implementation falls back to `keys` + sequential deletes.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StorageError> {
        let mut removed = 0;
        for key in self.keys(pattern).await? {
            if self.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Wipe every key owned by this store. Destructive; reserved for the
    /// emergency path and explicit operator action.
    async fn clear_all(&self) -> Result<u64, StorageError>;

    /// Best-effort hint to release memory held by the backend.
    async fn compact(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// Redis-style glob match supporting `*` (any run) and `?` (one char).
#[must_use]
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_k = 0usize;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_k = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_k += 1;
            ki = star_k;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
