//! Cache store backends.
//!
//! - [`memory::InMemoryStore`]: process-local, used when no Redis URL is configured
//! - [`redis::RedisStore`]: shared cache for multi-reader deployments

pub mod traits;
pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;
pub use traits::{glob_match, CacheEntry, CacheStore, StorageError};
