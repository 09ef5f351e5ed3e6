//! Feedback aggregation.
//!
//! A poll copies the instance out of the slot under the read lock, then
//! consults the executor with the lock released. Terminal instances report
//! their last known sub-status without touching the executor.

use robot_command_spec::{
    CommandFeedback, CommandId, CommandKind, CommonError, ExecutionStatus, FeedbackStatus,
    ResponseHeader, RobotCommandFeedbackResponse,
};

use crate::executor::ExecutorBridge;
use crate::slot::{CommandSlot, SlotLookup};
use crate::FeedbackError;

/// Point-in-time copy of a command's reportable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackSnapshot {
    /// Command identifier.
    pub id: CommandId,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Diagnostic message.
    pub message: String,
    /// Sub-status.
    pub feedback: CommandFeedback,
    /// Command kind; `None` once the record has been evicted from history.
    pub kind: Option<CommandKind>,
}

impl FeedbackSnapshot {
    pub(crate) fn capture(slot: &CommandSlot, id: CommandId) -> Result<Self, FeedbackError> {
        match slot.lookup(id) {
            SlotLookup::Active(inst) | SlotLookup::Retained(inst) => Ok(Self {
                id,
                status: inst.status,
                message: inst.message.clone(),
                feedback: inst.feedback,
                kind: Some(inst.kind),
            }),
            SlotLookup::Evicted(status) => Ok(Self {
                id,
                status,
                message: format!("robot command {id} ended; details are no longer retained"),
                feedback: CommandFeedback::None,
                kind: None,
            }),
            SlotLookup::Forgotten => Err(FeedbackError::NoLongerRetained(id)),
            SlotLookup::NeverIssued => Err(FeedbackError::UnknownCommand(id)),
        }
    }

    pub(crate) fn with_live_feedback(mut self, executor: &dyn ExecutorBridge) -> Self {
        if self.status != ExecutionStatus::Processing {
            return self;
        }
        let Some(kind) = self.kind else {
            return self;
        };
        if let Some(live) = executor
            .query_feedback(self.id)
            .filter(|feedback| feedback.fits(kind))
        {
            self.feedback = live;
        }
        self
    }

    pub(crate) fn into_response(self, header: ResponseHeader) -> RobotCommandFeedbackResponse {
        RobotCommandFeedbackResponse {
            header,
            status: self.status.into(),
            message: self.message,
            feedback: self.feedback,
        }
    }
}

pub(crate) fn unknown_command_response(
    mut header: ResponseHeader,
    err: FeedbackError,
) -> RobotCommandFeedbackResponse {
    let message = err.to_string();
    if let FeedbackError::UnknownCommand(_) = err {
        header.error = CommonError::invalid_request(message.clone());
    }
    RobotCommandFeedbackResponse {
        header,
        status: FeedbackStatus::Unknown,
        message,
        feedback: CommandFeedback::None,
    }
}
