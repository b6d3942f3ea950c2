//! Tracing subscriber bootstrap for host processes.
//!
//! The engine itself only emits `tracing` events. Hosts that don't install
//! their own subscriber can call [`init_tracing`] once at startup.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static TRACING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Install a global subscriber using `RUST_LOG` if set, else `config.filter`.
///
/// Returns `true` if this call installed the subscriber, `false` if one was
/// already installed (by an earlier call or by the host).
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed_now = false;
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // try_init: another subscriber may already be set by the host
        installed_now = tracing_subscriber::registry().with(layer).try_init().is_ok();
        if installed_now {
            tracing::info!(filter = %config.filter, json = config.json, "Tracing initialized");
        }
        installed_now
    });
    installed_now
}
