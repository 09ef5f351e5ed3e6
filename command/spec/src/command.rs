//! Command union and the submit exchange.
//!
//! A request carries at most one top-level command: either a full-body
//! behavior or a mobility command. Each family wraps its own inner choice so
//! an unset inner variant is representable and can be rejected explicitly.

use serde::{Deserialize, Serialize};

use crate::{CommandId, Lease, LeaseUseResult, RequestHeader, ResponseHeader, Timestamp};

/// Opaque robot-specific parameters forwarded untouched to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extension {
    /// Type identifier of the payload.
    pub type_url: String,
    /// Payload contents.
    pub value: serde_json::Value,
}

/// Full-body behaviors. All of them belong to the frozen-safe subset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FullBodyVariant {
    /// Stop all motion and hold the current posture.
    Stop,
    /// Freeze joints in place.
    Freeze,
    /// Recover an upright posture after a fall.
    SelfRight,
    /// Settle the robot and cut motor power.
    SafePowerOff,
}

/// Full-body command family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullBodyCommand {
    /// Selected behavior; `None` means the inner choice was left unset.
    pub command: Option<FullBodyVariant>,
    /// Robot-specific parameters.
    #[serde(default)]
    pub params: Option<Extension>,
}

/// Planar pose in a named frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Se2Pose {
    /// X position in meters.
    pub x: f64,
    /// Y position in meters.
    pub y: f64,
    /// Heading in radians.
    pub angle: f64,
}

/// Planar velocity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Se2Velocity {
    /// Forward velocity in m/s.
    pub vx: f64,
    /// Lateral velocity in m/s.
    pub vy: f64,
    /// Yaw rate in rad/s.
    pub angular: f64,
}

/// Waypoint of a planar trajectory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Se2TrajectoryPoint {
    /// Target pose.
    pub pose: Se2Pose,
    /// Offset from the trajectory start at which the pose should be reached.
    pub time_since_reference_ms: u64,
}

/// Mobility behaviors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MobilityVariant {
    /// Follow a planar trajectory to a goal pose.
    Se2Trajectory {
        /// Client-clock time after which the command must stop.
        end_time: Timestamp,
        /// Frame the trajectory is expressed in.
        frame_name: String,
        /// Waypoints.
        points: Vec<Se2TrajectoryPoint>,
    },
    /// Move at a constant planar velocity.
    Se2Velocity {
        /// Client-clock time after which the command must stop.
        end_time: Timestamp,
        /// Frame the velocity is expressed in.
        frame_name: String,
        /// Commanded velocity.
        velocity: Se2Velocity,
    },
    /// Sit down.
    Sit,
    /// Stand up.
    Stand,
}

/// Mobility command family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MobilityCommand {
    /// Selected behavior; `None` means the inner choice was left unset.
    pub command: Option<MobilityVariant>,
    /// Robot-specific parameters.
    #[serde(default)]
    pub params: Option<Extension>,
}

/// Top-level command: a full-body behavior or a mobility command, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RobotCommand {
    /// Full-body behavior.
    FullBody(FullBodyCommand),
    /// Mobility command.
    Mobility(MobilityCommand),
}

/// Flattened command kind, available once both levels of the union are set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// [`FullBodyVariant::Stop`].
    Stop,
    /// [`FullBodyVariant::Freeze`].
    Freeze,
    /// [`FullBodyVariant::SelfRight`].
    SelfRight,
    /// [`FullBodyVariant::SafePowerOff`].
    SafePowerOff,
    /// [`MobilityVariant::Se2Trajectory`].
    Se2Trajectory,
    /// [`MobilityVariant::Se2Velocity`].
    Se2Velocity,
    /// [`MobilityVariant::Sit`].
    Sit,
    /// [`MobilityVariant::Stand`].
    Stand,
}

impl CommandKind {
    /// Whether the kind may be admitted while the robot is frozen.
    pub fn is_frozen_safe(self) -> bool {
        matches!(
            self,
            CommandKind::Stop
                | CommandKind::Freeze
                | CommandKind::SelfRight
                | CommandKind::SafePowerOff
        )
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Stop => "stop",
            CommandKind::Freeze => "freeze",
            CommandKind::SelfRight => "self_right",
            CommandKind::SafePowerOff => "safe_power_off",
            CommandKind::Se2Trajectory => "se2_trajectory",
            CommandKind::Se2Velocity => "se2_velocity",
            CommandKind::Sit => "sit",
            CommandKind::Stand => "stand",
        }
    }
}

impl RobotCommand {
    /// Flattened kind, or `None` when the inner variant is unset.
    pub fn kind(&self) -> Option<CommandKind> {
        match self {
            RobotCommand::FullBody(cmd) => cmd.command.map(|variant| match variant {
                FullBodyVariant::Stop => CommandKind::Stop,
                FullBodyVariant::Freeze => CommandKind::Freeze,
                FullBodyVariant::SelfRight => CommandKind::SelfRight,
                FullBodyVariant::SafePowerOff => CommandKind::SafePowerOff,
            }),
            RobotCommand::Mobility(cmd) => cmd.command.as_ref().map(|variant| match variant {
                MobilityVariant::Se2Trajectory { .. } => CommandKind::Se2Trajectory,
                MobilityVariant::Se2Velocity { .. } => CommandKind::Se2Velocity,
                MobilityVariant::Sit => CommandKind::Sit,
                MobilityVariant::Stand => CommandKind::Stand,
            }),
        }
    }

    /// Client-clock end time embedded in the command, if it carries one.
    pub fn end_time(&self) -> Option<Timestamp> {
        match self {
            RobotCommand::Mobility(MobilityCommand {
                command:
                    Some(
                        MobilityVariant::Se2Trajectory { end_time, .. }
                        | MobilityVariant::Se2Velocity { end_time, .. },
                    ),
                ..
            }) => Some(*end_time),
            _ => None,
        }
    }

    /// Convenience constructor for a full-body command without parameters.
    pub fn full_body(variant: FullBodyVariant) -> Self {
        RobotCommand::FullBody(FullBodyCommand {
            command: Some(variant),
            params: None,
        })
    }

    /// Convenience constructor for a mobility command without parameters.
    pub fn mobility(variant: MobilityVariant) -> Self {
        RobotCommand::Mobility(MobilityCommand {
            command: Some(variant),
            params: None,
        })
    }
}

/// Submit request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotCommandRequest {
    /// Request header.
    #[serde(default)]
    pub header: RequestHeader,
    /// Lease presented for command authority.
    #[serde(default)]
    pub lease: Lease,
    /// Command to execute; `None` is a malformed request.
    pub command: Option<RobotCommand>,
    /// Identifier of the time-sync relationship used to interpret end times.
    #[serde(default)]
    pub clock_identifier: String,
}

/// Submit outcome.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotCommandStatus {
    /// Not admitted for a reason reported elsewhere (lease outcome).
    #[default]
    Unknown,
    /// Admitted.
    Ok,
    /// No command was set.
    InvalidRequest,
    /// The command variant is unset or not allowed in the current robot state.
    Unsupported,
    /// No time synchronization exists for the clock identifier.
    NoTimesync,
    /// The end time is already in the past.
    Expired,
    /// The end time is beyond the allowed horizon.
    TooDistant,
    /// Motor power is off.
    NotPoweredOn,
}

impl RobotCommandStatus {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RobotCommandStatus::Unknown => "unknown",
            RobotCommandStatus::Ok => "ok",
            RobotCommandStatus::InvalidRequest => "invalid_request",
            RobotCommandStatus::Unsupported => "unsupported",
            RobotCommandStatus::NoTimesync => "no_timesync",
            RobotCommandStatus::Expired => "expired",
            RobotCommandStatus::TooDistant => "too_distant",
            RobotCommandStatus::NotPoweredOn => "not_powered_on",
        }
    }
}

/// Submit response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RobotCommandResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Lease validation outcome.
    pub lease_use_result: LeaseUseResult,
    /// Admission outcome.
    pub status: RobotCommandStatus,
    /// Diagnostic message; callers branch on `status`.
    pub message: String,
    /// Identifier of the admitted command, zero when not admitted.
    pub robot_command_id: CommandId,
}
