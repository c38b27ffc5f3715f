// src/residency/stats.rs
//! Read-only observability snapshot, in the spirit of the teacher's
//! `AssetStatistics` / `CacheStats` — additive diagnostics, not a new
//! eviction feature, so it sits outside the spec's closed public surface
//! without conflicting with it.

use std::fmt;

/// Snapshot of the manager's state at the moment `stats()` was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidencyStats {
    pub resident: usize,
    pub loading: usize,
    pub absent: usize,
    pub total_consumed_bytes: u64,
    pub last_iteration_activated: u64,
    pub last_iteration_released: u64,
    pub backpressure_skips: u64,
}

impl fmt::Display for ResidencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resident={} loading={} absent={} consumed={} (activated {} / released {} last iter, {} backpressure skips)",
            self.resident,
            self.loading,
            self.absent,
            format_bytes(self.total_consumed_bytes),
            self.last_iteration_activated,
            self.last_iteration_released,
            self.backpressure_skips,
        )
    }
}

/// Human-readable byte formatting for `tracing` log lines, not part of the
/// public API.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
