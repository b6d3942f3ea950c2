// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with configurable backoff.
//!
//! Provides retry behavior for transient failures. Two curves are supported:
//! exponential (Redis commands, connections) and linear (upstream pages,
//! where attempt `n` waits `initial_delay * n`).
//!
//! # Example
//!
//! ```
//! use commerce_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Upstream pages: 3 attempts, linear backoff
//! let pages = RetryConfig::upstream_page(Duration::from_millis(500), 3);
//! assert_eq!(pages.delay_for_attempt(1), Duration::from_millis(500));
//! assert_eq!(pages.delay_for_attempt(2), Duration::from_millis(1000));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial_delay * factor^(n-1)`
    Exponential { factor: f64 },
    /// `initial_delay * n`
    Linear,
}

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::query()`] - Quick retry for individual cache commands
/// - [`RetryConfig::upstream_page()`] - Linear backoff for rate-limited pages
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// Quick retry for individual queries (don't block forever).
    /// 3 attempts with fast backoff - if it fails, let caller handle it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// Linear backoff for upstream page requests.
    #[must_use]
    pub fn upstream_page(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_retries: Some(max_attempts as usize),
            initial_delay: base_delay,
            max_delay: base_delay.saturating_mul(max_attempts.max(1)),
            backoff: Backoff::Linear,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Linear => self.initial_delay.saturating_mul(attempt),
            Backoff::Exponential { factor } => {
                let exp = factor.powi(attempt as i32 - 1);
                Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * exp)
                    .unwrap_or(self.max_delay)
            }
        };
        raw.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    #[must_use]
    pub fn allows_another(&self, attempts: usize) -> bool {
        self.max_retries.map_or(true, |max| attempts < max)
    }
}

/// Run `operation` until it succeeds or the retry budget is spent.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Like [`retry`], but only errors for which `is_retryable` returns true are
/// retried; any other error is returned immediately.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if !is_retryable(&err) || !config.allows_another(attempts) {
                    return Err(err);
                }

                let delay = config.delay_for_attempt(attempts as u32);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempts,
                    config.max_retries.map_or_else(|| "∞".to_string(), |m| m.to_string()),
                    err,
                    delay
                );

                sleep(delay).await;
            }
        }
    }
}
