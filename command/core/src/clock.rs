//! Robot-local time and client clock translation.
//!
//! Command end times are expressed on the client's clock. A time-sync
//! exchange (outside this crate) establishes the skew between that clock and
//! the robot's; the arbiter only needs the resulting offset per clock id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use robot_command_spec::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Source of robot-local time.
pub trait LocalClock: Send + Sync {
    /// Current robot time.
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Manually advanced clock for simulation and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move time forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl LocalClock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Robot-minus-client clock skew for one synchronized client clock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockOffset {
    /// Milliseconds to add to a client timestamp to obtain robot time.
    pub skew_ms: i64,
}

impl ClockOffset {
    /// Translate a client timestamp into robot time, saturating at the epoch.
    pub fn to_local(self, client_time: Timestamp) -> Timestamp {
        client_time.saturating_add_signed(self.skew_ms)
    }
}

/// Failures resolving a clock identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockSyncError {
    /// No synchronization has been established for the identifier.
    #[error("no time synchronization established for clock {0:?}")]
    NotSynchronized(String),
}

/// Oracle that resolves client clock identifiers to offsets.
pub trait ClockSyncOracle: Send + Sync {
    /// Offset for `clock_identifier`, or an error when no sync exists.
    fn offset_for(&self, clock_identifier: &str) -> Result<ClockOffset, ClockSyncError>;
}

/// In-process registry of established clock offsets.
#[derive(Debug, Default)]
pub struct TimeSyncRegistry {
    offsets: RwLock<HashMap<String, ClockOffset>>,
}

impl TimeSyncRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the offset for a clock identifier.
    pub fn establish(&self, clock_identifier: impl Into<String>, offset: ClockOffset) {
        let clock_identifier = clock_identifier.into();
        info!(clock = %clock_identifier, skew_ms = offset.skew_ms, "time sync established");
        self.offsets.write().insert(clock_identifier, offset);
    }

    /// Drop the offset for a clock identifier. Returns whether one existed.
    pub fn forget(&self, clock_identifier: &str) -> bool {
        self.offsets.write().remove(clock_identifier).is_some()
    }

    /// Number of synchronized clocks.
    pub fn len(&self) -> usize {
        self.offsets.read().len()
    }

    /// Whether no clock is synchronized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClockSyncOracle for TimeSyncRegistry {
    fn offset_for(&self, clock_identifier: &str) -> Result<ClockOffset, ClockSyncError> {
        self.offsets
            .read()
            .get(clock_identifier)
            .copied()
            .ok_or_else(|| ClockSyncError::NotSynchronized(clock_identifier.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_translates_both_directions() {
        assert_eq!(ClockOffset { skew_ms: 250 }.to_local(1_000), 1_250);
        assert_eq!(ClockOffset { skew_ms: -250 }.to_local(1_000), 750);
        assert_eq!(ClockOffset { skew_ms: -5_000 }.to_local(1_000), 0);
    }

    #[test]
    fn registry_reports_missing_sync() {
        let registry = TimeSyncRegistry::new();
        assert_eq!(
            registry.offset_for("tablet"),
            Err(ClockSyncError::NotSynchronized("tablet".into()))
        );
        registry.establish("tablet", ClockOffset { skew_ms: 10 });
        assert_eq!(registry.offset_for("tablet"), Ok(ClockOffset { skew_ms: 10 }));
        assert!(registry.forget("tablet"));
        assert!(registry.is_empty());
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }
}
