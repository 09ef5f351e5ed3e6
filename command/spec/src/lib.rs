//! Robot command wire types.
//!
//! This crate defines the request/response schema for submitting robot
//! commands, polling their execution feedback, and clearing behavior faults,
//! together with the lease and header types those exchanges carry.
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};

/// Command union, request, and response types.
pub mod command;
/// Behavior fault records and clearance exchange.
pub mod fault;
/// Execution feedback: statuses, sub-statuses, and the poll exchange.
pub mod feedback;

pub use command::{
    CommandKind, Extension, FullBodyCommand, FullBodyVariant, MobilityCommand, MobilityVariant,
    RobotCommand, RobotCommandRequest, RobotCommandResponse, RobotCommandStatus, Se2Pose,
    Se2TrajectoryPoint, Se2Velocity,
};
pub use fault::{
    BehaviorFault, BehaviorFaultId, ClearBehaviorFaultRequest, ClearBehaviorFaultResponse,
    ClearBehaviorFaultStatus, FaultCause,
};
pub use feedback::{
    CommandFeedback, ExecutionStatus, FeedbackStatus, RobotCommandFeedbackRequest,
    RobotCommandFeedbackResponse, SafePowerOffStatus, Se2TrajectoryStatus, StandStatus,
};

/// Wall-clock timestamp (unix epoch millis).
pub type Timestamp = u64;

/// Server-assigned command identifier. Zero is never issued.
pub type CommandId = u64;

/// Header attached to every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestHeader {
    /// Name of the client issuing the request.
    pub client_name: String,
    /// Client-clock time at which the request was sent.
    pub request_timestamp: Option<Timestamp>,
}

/// Coarse outcome of handling a request, independent of exchange-specific status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommonErrorCode {
    /// Request handled.
    #[default]
    Ok,
    /// Request was rejected as invalid (malformed, unauthorized, or unknown target).
    InvalidRequest,
    /// Server failed while handling the request.
    InternalServerError,
}

/// Common error carried in every response header.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommonError {
    /// Error code.
    pub code: CommonErrorCode,
    /// Diagnostic message; never parsed by callers.
    pub message: String,
}

impl CommonError {
    /// Build an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: CommonErrorCode::InvalidRequest,
            message: message.into(),
        }
    }
}

/// Header attached to every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Echo of the request header.
    pub request_header: RequestHeader,
    /// Robot-clock time the request was received.
    pub request_received_timestamp: Timestamp,
    /// Robot-clock time the response was produced.
    pub response_timestamp: Timestamp,
    /// Common error outcome.
    pub error: CommonError,
}

impl ResponseHeader {
    /// Start a response header for a request received at `received`.
    pub fn for_request(request_header: &RequestHeader, received: Timestamp) -> Self {
        Self {
            request_header: request_header.clone(),
            request_received_timestamp: received,
            response_timestamp: received,
            error: CommonError::default(),
        }
    }
}

/// Opaque ownership token proving the right to command a robot resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Lease {
    /// Resource the lease covers (e.g. `body`).
    pub resource: String,
    /// Epoch issued by the lease authority; changes when ownership history resets.
    pub epoch: String,
    /// Sequence within the epoch; higher sequences supersede lower ones.
    pub sequence: Vec<u32>,
    /// Clients that have held this lease lineage.
    #[serde(default)]
    pub client_names: Vec<String>,
}

impl Lease {
    /// Whether the token carries no identifying content.
    pub fn is_empty(&self) -> bool {
        self.resource.is_empty() && self.epoch.is_empty() && self.sequence.is_empty()
    }
}

/// Outcome of validating a lease for use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseUseStatus {
    /// Not evaluated.
    #[default]
    Unknown,
    /// The lease grants command authority.
    Ok,
    /// The token is malformed.
    Invalid,
    /// The lease was valid once but ownership has been released or lost.
    Revoked,
    /// A newer lease exists for the resource.
    Older,
    /// The resource is not managed by the authority.
    Unmanaged,
    /// The lease belongs to a different epoch.
    WrongEpoch,
}

/// Lease validation record returned with mutating responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseUseResult {
    /// Validation outcome.
    pub status: LeaseUseStatus,
    /// Lease presented by the caller.
    pub attempted_lease: Lease,
    /// Most recent lease known to the authority, if any.
    pub latest_known_lease: Option<Lease>,
}

impl LeaseUseResult {
    /// Whether the validated lease grants command authority.
    pub fn is_ok(&self) -> bool {
        self.status == LeaseUseStatus::Ok
    }
}
