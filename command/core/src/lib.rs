//! Command arbitration core: single-slot admission, supersession, expiry,
//! frozen-state gating, feedback aggregation, and behavior fault clearance.
//!
//! One [`CommandArbiter`] exists per robot session. It owns the command slot
//! and serializes every mutation behind a single lock; collaborators (lease
//! authority, time sync, executor) are reached through narrow traits.
#![deny(missing_docs)]

use robot_command_spec::{
    CommandId, CommandKind, LeaseUseStatus, RobotCommandStatus, Timestamp,
};

/// Per-robot arbiter: submit, expiry, frozen transitions, and fault clearance.
pub mod arbiter;
/// Local time sources and client clock synchronization.
pub mod clock;
/// Arbiter configuration and its TOML loader.
pub mod config;
/// Executor bridge contract, event channel, and a simulated executor.
pub mod executor;
/// Outstanding behavior faults.
pub mod faults;
/// Mapping of slot snapshots and live executor state into feedback.
pub mod feedback;
/// Lease validation contract and an in-process lease authority.
pub mod lease;
/// Single-active-command register with bounded history.
pub mod slot;

pub use arbiter::{ArbiterParts, CommandArbiter, PowerState, RobotState};
pub use clock::{
    ClockOffset, ClockSyncError, ClockSyncOracle, LocalClock, ManualClock, SystemClock,
    TimeSyncRegistry,
};
pub use config::{ArbiterConfig, ConfigError};
pub use executor::{
    executor_channel, ExecutorBridge, ExecutorEvent, ExecutorEvents, ExecutorSink,
    SimulatedExecutor,
};
pub use faults::FaultRegister;
pub use feedback::FeedbackSnapshot;
pub use lease::{LeaseAuthority, LeaseError, LeaseValidator};
pub use slot::{CommandInstance, CommandSlot, SlotLookup};

/// Reasons a submitted command is not admitted.
///
/// Each variant is a normal response outcome; its display text becomes the
/// diagnostic message and [`AdmissionError::status`] the wire status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// No top-level command was set.
    #[error("request carries no command")]
    Malformed,
    /// The inner command variant was left unset.
    #[error("command variant is unset")]
    Unsupported,
    /// The lease validator did not grant authority.
    #[error("lease rejected: {0:?}")]
    Lease(LeaseUseStatus),
    /// The clock identifier has no synchronization record.
    #[error(transparent)]
    NoTimeSync(#[from] ClockSyncError),
    /// The translated end time has already passed.
    #[error("command end time {deadline} is not after robot time {now}")]
    Expired {
        /// Translated end time.
        deadline: Timestamp,
        /// Robot time at validation.
        now: Timestamp,
    },
    /// The translated end time lies beyond the configured horizon.
    #[error("command end time {deadline} is beyond the horizon limit {limit}")]
    TooDistant {
        /// Translated end time.
        deadline: Timestamp,
        /// Latest acceptable end time.
        limit: Timestamp,
    },
    /// Motor power is off and the command is not a safe power-off.
    #[error("robot motors are not powered on")]
    NotPoweredOn,
    /// The robot is frozen and the command is outside the safe subset.
    #[error("robot is frozen; {} is not accepted until it is unfrozen", .0.as_str())]
    Frozen(CommandKind),
}

impl AdmissionError {
    /// Wire status reported for this rejection.
    pub fn status(&self) -> RobotCommandStatus {
        match self {
            AdmissionError::Malformed => RobotCommandStatus::InvalidRequest,
            AdmissionError::Unsupported | AdmissionError::Frozen(_) => {
                RobotCommandStatus::Unsupported
            }
            AdmissionError::Lease(_) => RobotCommandStatus::Unknown,
            AdmissionError::NoTimeSync(_) => RobotCommandStatus::NoTimesync,
            AdmissionError::Expired { .. } => RobotCommandStatus::Expired,
            AdmissionError::TooDistant { .. } => RobotCommandStatus::TooDistant,
            AdmissionError::NotPoweredOn => RobotCommandStatus::NotPoweredOn,
        }
    }

    /// Whether the rejection also marks the response header as an invalid request.
    pub fn is_request_error(&self) -> bool {
        matches!(self, AdmissionError::Malformed | AdmissionError::Lease(_))
    }
}

/// Errors returned when resolving a command identifier for feedback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackError {
    /// The identifier was never issued in this robot session.
    #[error("robot command {0} was never issued")]
    UnknownCommand(CommandId),
    /// The identifier was issued, but even its final status has been discarded.
    #[error("robot command {0} ended and is no longer retained")]
    NoLongerRetained(CommandId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_statuses_follow_taxonomy() {
        assert_eq!(
            AdmissionError::Malformed.status(),
            RobotCommandStatus::InvalidRequest
        );
        assert_eq!(
            AdmissionError::Frozen(CommandKind::Sit).status(),
            RobotCommandStatus::Unsupported
        );
        assert_eq!(
            AdmissionError::Lease(LeaseUseStatus::Older).status(),
            RobotCommandStatus::Unknown
        );
        assert!(AdmissionError::Lease(LeaseUseStatus::Revoked).is_request_error());
        assert!(!AdmissionError::NotPoweredOn.is_request_error());
    }

    #[test]
    fn frozen_message_names_command() {
        let msg = AdmissionError::Frozen(CommandKind::Se2Velocity).to_string();
        assert!(msg.contains("se2_velocity"), "{msg}");
    }
}
