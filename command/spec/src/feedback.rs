//! Execution status and feedback polling.

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::{CommandId, RequestHeader, ResponseHeader};

/// Lifecycle status of an admitted command.
///
/// `Processing` is the only non-terminal status; once an instance leaves it,
/// the status never changes again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The command is the active slot occupant and is executing.
    Processing,
    /// A newer command superseded it.
    Overridden,
    /// Its deadline passed before it was superseded.
    TimedOut,
    /// The robot entered the frozen safety state while it was executing.
    RobotFrozen,
}

impl ExecutionStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Processing)
    }
}

/// Feedback status reported on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackStatus {
    /// The identifier was never issued.
    #[default]
    Unknown,
    /// See [`ExecutionStatus::Processing`].
    Processing,
    /// See [`ExecutionStatus::Overridden`].
    CommandOverridden,
    /// See [`ExecutionStatus::TimedOut`].
    CommandTimedOut,
    /// See [`ExecutionStatus::RobotFrozen`].
    RobotFrozen,
}

impl FeedbackStatus {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackStatus::Unknown => "unknown",
            FeedbackStatus::Processing => "processing",
            FeedbackStatus::CommandOverridden => "command_overridden",
            FeedbackStatus::CommandTimedOut => "command_timed_out",
            FeedbackStatus::RobotFrozen => "robot_frozen",
        }
    }
}

impl From<ExecutionStatus> for FeedbackStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Processing => FeedbackStatus::Processing,
            ExecutionStatus::Overridden => FeedbackStatus::CommandOverridden,
            ExecutionStatus::TimedOut => FeedbackStatus::CommandTimedOut,
            ExecutionStatus::RobotFrozen => FeedbackStatus::RobotFrozen,
        }
    }
}

/// Trajectory progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Se2TrajectoryStatus {
    /// The goal pose has been reached.
    AtGoal,
    /// Still moving toward the goal.
    GoingToGoal,
}

/// Safe power-off progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafePowerOffStatus {
    /// Motors are still powered.
    PowerOn,
    /// Motors are off.
    PowerOff,
}

/// Stand progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandStatus {
    /// Standing.
    Standing,
    /// Not yet standing.
    NotStanding,
}

/// Command-family specific sub-status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandFeedback {
    /// The family reports no sub-status.
    #[default]
    None,
    /// Trajectory progress.
    Se2Trajectory(Se2TrajectoryStatus),
    /// Safe power-off progress.
    SafePowerOff(SafePowerOffStatus),
    /// Stand progress.
    Stand(StandStatus),
}

impl CommandFeedback {
    /// Sub-status a freshly admitted command of `kind` starts with.
    pub fn initial_for(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Se2Trajectory => {
                CommandFeedback::Se2Trajectory(Se2TrajectoryStatus::GoingToGoal)
            }
            CommandKind::SafePowerOff => CommandFeedback::SafePowerOff(SafePowerOffStatus::PowerOn),
            CommandKind::Stand => CommandFeedback::Stand(StandStatus::NotStanding),
            _ => CommandFeedback::None,
        }
    }

    /// Whether this sub-status belongs to the family of `kind`.
    pub fn fits(self, kind: CommandKind) -> bool {
        matches!(
            (self, kind),
            (CommandFeedback::None, _)
                | (CommandFeedback::Se2Trajectory(_), CommandKind::Se2Trajectory)
                | (CommandFeedback::SafePowerOff(_), CommandKind::SafePowerOff)
                | (CommandFeedback::Stand(_), CommandKind::Stand)
        )
    }
}

/// Feedback poll request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RobotCommandFeedbackRequest {
    /// Request header.
    #[serde(default)]
    pub header: RequestHeader,
    /// Identifier returned by a previous submit.
    pub robot_command_id: CommandId,
}

/// Feedback poll response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RobotCommandFeedbackResponse {
    /// Response header; `InvalidRequest` when the identifier was never issued.
    pub header: ResponseHeader,
    /// Lifecycle status.
    pub status: FeedbackStatus,
    /// Diagnostic message; callers branch on `status`.
    pub message: String,
    /// Family-specific sub-status.
    pub feedback: CommandFeedback,
}
