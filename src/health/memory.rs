//! Memory usage sources for the health monitor.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::System;

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    /// Used/total in `0.0..=1.0`; zero when the total is unknown.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.used_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
        }
    }
}

/// Source of the memory ratio checked by the monitor.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Result<MemorySample, String>;
}

/// Reads memory through `sysinfo`.
///
/// With a configured limit the ratio is this process's resident set over the
/// limit (container budgets); otherwise it is system-wide used over total.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    limit_bytes: Option<u64>,
}

impl SystemMemoryProbe {
    #[must_use]
    pub fn new(limit_bytes: Option<u64>) -> Self {
        Self {
            system: Mutex::new(System::new()),
            limit_bytes,
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> Result<MemorySample, String> {
        let mut system = self.system.lock();

        if let Some(limit) = self.limit_bytes {
            let pid = sysinfo::get_current_pid().map_err(|e| e.to_string())?;
            system.refresh_process(pid);
            let rss = system
                .process(pid)
                .map(|p| p.memory())
                .ok_or_else(|| "current process not visible to sysinfo".to_string())?;
            return Ok(MemorySample {
                used_bytes: rss,
                total_bytes: limit,
            });
        }

        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err("total memory unavailable".into());
        }
        Ok(MemorySample {
            used_bytes: system.used_memory(),
            total_bytes: total,
        })
    }
}

/// Probe reporting a settable ratio, for hosts that compute memory pressure
/// themselves (cgroup readers, allocator stats) and for simulations.
#[derive(Debug)]
pub struct StaticMemoryProbe {
    ratio_bits: AtomicU64,
}

impl StaticMemoryProbe {
    #[must_use]
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio_bits: AtomicU64::new(ratio.clamp(0.0, 1.0).to_bits()),
        }
    }

    pub fn set(&self, ratio: f64) {
        self.ratio_bits.store(ratio.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    #[must_use]
    pub fn ratio(&self) -> f64 {
        f64::from_bits(self.ratio_bits.load(Ordering::SeqCst))
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn sample(&self) -> Result<MemorySample, String> {
        const SCALE: u64 = 1_000_000;
        Ok(MemorySample {
            used_bytes: (self.ratio() * SCALE as f64).round() as u64,
            total_bytes: SCALE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_ratio() {
        let sample = MemorySample { used_bytes: 920, total_bytes: 1000 };
        assert!((sample.ratio() - 0.92).abs() < 1e-9);
        assert_eq!(MemorySample { used_bytes: 5, total_bytes: 0 }.ratio(), 0.0);
    }

    #[test]
    fn test_static_probe() {
        let probe = StaticMemoryProbe::new(0.5);
        assert!((probe.sample().unwrap().ratio() - 0.5).abs() < 1e-9);
        probe.set(0.92);
        assert!((probe.sample().unwrap().ratio() - 0.92).abs() < 1e-9);
        probe.set(7.0);
        assert_eq!(probe.ratio(), 1.0);
    }

    #[test]
    fn test_system_probe_reports_plausible_ratio() {
        let sample = SystemMemoryProbe::default().sample().unwrap();
        assert!(sample.total_bytes > 0);
        assert!((0.0..=1.0).contains(&sample.ratio()));
    }
}
