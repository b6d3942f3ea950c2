//! Health & resource monitoring.

pub mod types;
pub mod memory;
pub mod monitor;

pub use memory::{MemoryProbe, MemorySample, StaticMemoryProbe, SystemMemoryProbe};
pub use monitor::HealthMonitor;
pub use types::{CheckResult, CheckStatus, HealthDepth, HealthReport, OverallStatus};
