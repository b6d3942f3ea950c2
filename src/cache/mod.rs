//! Cache-aside facade and the key namespace it writes into.

pub mod client;
pub mod keys;

pub use client::CacheClient;
pub use keys::{DashboardDomain, KeyClass};
