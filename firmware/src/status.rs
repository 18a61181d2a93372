#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics mirror the application mode and battery telemetry so
//! the status LED task and the configuration link can read a consistent
//! snapshot without touching the application's shared state.

use node_core::app::NodeMode;
use portable_atomic::{AtomicU8, AtomicU16, Ordering};

const UNKNOWN_BATTERY: u16 = 0;

/// Last mode reported by the application loop.
static MODE: AtomicU8 = AtomicU8::new(0);
/// Millivolt reading from the last battery refresh (0 == unknown).
static BATTERY_MV: AtomicU16 = AtomicU16::new(UNKNOWN_BATTERY);

/// Records the application mode after each poll pass.
pub fn record_mode(mode: NodeMode) {
    #[allow(clippy::cast_possible_truncation)]
    MODE.store(mode.as_index() as u8, Ordering::Relaxed);
}

/// Returns the mirrored application mode.
pub fn current_mode() -> NodeMode {
    NodeMode::from_index(MODE.load(Ordering::Relaxed) as usize)
        .unwrap_or(NodeMode::Configuration)
}

/// Stores the latest battery reading (0 marks unknown).
pub fn record_battery(millivolts: u16) {
    BATTERY_MV.store(millivolts, Ordering::Relaxed);
}

/// Returns the most recent battery reading, if any.
pub fn battery_millivolts() -> Option<u16> {
    match BATTERY_MV.load(Ordering::Relaxed) {
        UNKNOWN_BATTERY => None,
        value => Some(value),
    }
}

/// Status LED cadence for a mode, in milliseconds. Zero means solid on.
pub const fn blink_interval_ms(mode: NodeMode) -> u64 {
    match mode {
        // Fast blink tells the technician the node is configurable.
        NodeMode::Configuration => 200,
        // Slow heartbeat while sampling.
        NodeMode::Running => 2_000,
        // Solid on: hung until power cycle.
        NodeMode::Error => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_mirror_round_trips() {
        for mode in [NodeMode::Configuration, NodeMode::Running, NodeMode::Error] {
            record_mode(mode);
            assert_eq!(current_mode(), mode);
        }
    }

    #[test]
    fn battery_mirror_distinguishes_unknown() {
        record_battery(0);
        assert_eq!(battery_millivolts(), None);
        record_battery(3_654);
        assert_eq!(battery_millivolts(), Some(3_654));
    }

    #[test]
    fn error_mode_is_solid() {
        assert_eq!(blink_interval_ms(NodeMode::Error), 0);
        assert!(blink_interval_ms(NodeMode::Configuration) < blink_interval_ms(NodeMode::Running));
    }
}
