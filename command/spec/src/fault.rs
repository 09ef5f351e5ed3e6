//! Behavior faults and their clearance.

use serde::{Deserialize, Serialize};

use crate::{Lease, LeaseUseResult, RequestHeader, ResponseHeader, Timestamp};

/// Identifier of a behavior fault, assigned by the executor that raised it.
pub type BehaviorFaultId = u32;

/// Why behavior was halted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCause {
    /// Unspecified cause.
    #[default]
    Unknown,
    /// The robot fell.
    Fall,
    /// A hardware condition stopped behavior.
    Hardware,
    /// The commanding lease timed out.
    LeaseTimeout,
}

/// A recorded safety-halt condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BehaviorFault {
    /// Fault identifier.
    pub id: BehaviorFaultId,
    /// Robot-clock time the fault was raised.
    pub onset_timestamp: Timestamp,
    /// Cause.
    pub cause: FaultCause,
}

/// Clear-fault request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearBehaviorFaultRequest {
    /// Request header.
    #[serde(default)]
    pub header: RequestHeader,
    /// Lease presented for command authority.
    #[serde(default)]
    pub lease: Lease,
    /// Fault to clear.
    pub behavior_fault_id: BehaviorFaultId,
}

/// Clear-fault outcome.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearBehaviorFaultStatus {
    /// Not evaluated (lease rejected).
    #[default]
    Unknown,
    /// The fault was cleared.
    Cleared,
    /// The fault is unknown or its condition persists.
    NotCleared,
}

impl ClearBehaviorFaultStatus {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ClearBehaviorFaultStatus::Unknown => "unknown",
            ClearBehaviorFaultStatus::Cleared => "cleared",
            ClearBehaviorFaultStatus::NotCleared => "not_cleared",
        }
    }
}

/// Clear-fault response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearBehaviorFaultResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Lease validation outcome.
    pub lease_use_result: LeaseUseResult,
    /// Clearance outcome.
    pub status: ClearBehaviorFaultStatus,
}
