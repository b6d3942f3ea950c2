//! Redis storage backend for the shared cache.
//!
//! Values are stored as JSON strings with `SET key value EX ttl`, so any
//! reader sharing the Redis instance can consume them without this crate.
//! An optional key prefix namespaces every key, and pattern operations use
//! cursor-based `SCAN` so they never block the server the way `KEYS` would.
//!
//! ```text
//! SET shop:dashboard:summary '{"revenue":1234.5}' EX 60
//! SCAN 0 MATCH shop:dashboard:* COUNT 500
//! ```

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{CacheStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 500;

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "shop:" → "shop:dashboard:summary")
    prefix: String,
}

impl RedisStore {
    /// Create a new Redis store without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new Redis store with an optional key prefix.
    ///
    /// The prefix is prepended to all keys, enabling namespacing when
    /// sharing a Redis instance with other applications. `clear_all` only
    /// removes keys under the prefix; without one it flushes the database.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use commerce_sync::storage::redis::RedisStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = RedisStore::with_prefix("redis://localhost", Some("shop:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Use startup config: fast-fail, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Collect full (prefixed) keys matching a full pattern via SCAN.
    async fn scan_raw(&self, full_pattern: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(full_pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::Backend(format!("SCAN failed: {}", e)))?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn delete_raw(&self, full_keys: &[String]) -> Result<u64, StorageError> {
        if full_keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let mut removed = 0u64;
        for chunk in full_keys.chunks(SCAN_BATCH) {
            let mut pipeline = pipe();
            for key in chunk {
                pipeline.del(key);
            }
            let counts: Vec<u64> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to delete keys: {}", e)))?;
            removed += counts.iter().sum::<u64>();
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let conn = self.connection.clone();
        let full_key = self.prefixed_key(key);

        let raw: Option<String> = retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            async move {
                let data: Option<String> = conn.get(&key).await?;
                Ok(data)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| StorageError::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StorageError> {
        let ttl_secs = ttl.as_secs();
        if ttl_secs == 0 {
            return Err(StorageError::MissingTtl(key.to_string()));
        }
        let payload = serde_json::to_string(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let conn = self.connection.clone();
        let full_key = self.prefixed_key(key);

        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            let payload = payload.clone();
            async move {
                let _: () = conn.set_ex(&key, payload, ttl_secs).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let full_key = self.prefixed_key(key);

        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            async move {
                let removed: u64 = conn.del(&key).await?;
                Ok(removed > 0)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let full_key = self.prefixed_key(key);

        retry("redis_exists", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            async move {
                let exists: bool = conn.exists(&key).await?;
                Ok(exists)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let mut conn = self.connection.clone();
        let full_key = self.prefixed_key(key);

        // -2: missing, -1: no expiry
        let ttl: i64 = conn
            .ttl(&full_key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(if ttl > 0 { Some(Duration::from_secs(ttl as u64)) } else { None })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let full_pattern = self.prefixed_key(pattern);
        let keys = self.scan_raw(&full_pattern).await?;
        Ok(keys.iter().map(|k| self.strip_prefix(k).to_string()).collect())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StorageError> {
        let full_pattern = self.prefixed_key(pattern);
        let keys = self.scan_raw(&full_pattern).await?;
        let removed = self.delete_raw(&keys).await?;
        debug!(pattern = %full_pattern, removed, "Deleted keys by pattern");
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<u64, StorageError> {
        if !self.prefix.is_empty() {
            return self.delete_pattern("*").await;
        }

        let mut conn = self.connection.clone();
        let count: u64 = cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        warn!(keys = count, "Flushing entire Redis database (no key prefix configured)");
        let _: () = cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(format!("FLUSHDB failed: {}", e)))?;
        Ok(count)
    }

    async fn compact(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        // Ask Redis to return freed pages to the OS; unsupported allocators reply with an error
        let result: Result<String, _> = cmd("MEMORY").arg("PURGE").query_async(&mut conn).await;
        if let Err(e) = result {
            debug!(error = %e, "MEMORY PURGE not supported by this Redis");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
