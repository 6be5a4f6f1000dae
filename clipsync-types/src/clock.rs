//! Hybrid clock — the total order behind last-writer-wins resolution.

use crate::DeviceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A (physical timestamp, device id) pair.
///
/// Comparison is derived field-by-field: a greater physical timestamp wins
/// outright, and equal timestamps fall back to lexicographic order over the
/// device id. This gives every pair of clocks produced by distinct devices
/// a strict order, which is what makes whole-item LWW deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HybridClock {
    /// Physical timestamp, unix milliseconds.
    pub ts: i64,
    /// Device that produced the mutation.
    pub device_id: DeviceId,
}

impl HybridClock {
    pub fn new(ts: i64, device_id: DeviceId) -> Self {
        Self { ts, device_id }
    }

    /// Clock stamped with the current wall time.
    pub fn now(device_id: DeviceId) -> Self {
        Self {
            ts: crate::now_millis(),
            device_id,
        }
    }
}

impl fmt::Display for HybridClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ts, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greater_timestamp_wins() {
        let a = HybridClock::new(50, DeviceId::from("X"));
        let b = HybridClock::new(80, DeviceId::from("Y"));
        assert!(b > a);
    }

    #[test]
    fn equal_timestamps_fall_back_to_device_id() {
        let a = HybridClock::new(100, DeviceId::from("A"));
        let b = HybridClock::new(100, DeviceId::from("B"));
        assert!(b > a);
    }
}
