//! Resilience primitives shared by the cache backends and the fetch client.

pub mod retry;
