//! Outstanding behavior faults.
//!
//! Faults enter only through executor events and leave only through an
//! explicit clear whose underlying condition the executor confirms resolved.

use std::collections::BTreeMap;

use robot_command_spec::{BehaviorFault, BehaviorFaultId, ClearBehaviorFaultStatus};
use tracing::{info, warn};

/// Register of uncleared faults keyed by id.
#[derive(Debug, Default, Clone)]
pub struct FaultRegister {
    faults: BTreeMap<BehaviorFaultId, BehaviorFault>,
}

impl FaultRegister {
    /// Create an empty register.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raised fault. A repeated id replaces the earlier record.
    pub fn record(&mut self, fault: BehaviorFault) {
        warn!(fault_id = fault.id, cause = ?fault.cause, "behavior fault raised");
        self.faults.insert(fault.id, fault);
    }

    /// Try to clear `id`; `resolved` is consulted only for known faults.
    pub fn clear(
        &mut self,
        id: BehaviorFaultId,
        resolved: impl FnOnce(BehaviorFaultId) -> bool,
    ) -> ClearBehaviorFaultStatus {
        if !self.faults.contains_key(&id) {
            return ClearBehaviorFaultStatus::NotCleared;
        }
        if !resolved(id) {
            return ClearBehaviorFaultStatus::NotCleared;
        }
        self.faults.remove(&id);
        info!(fault_id = id, "behavior fault cleared");
        ClearBehaviorFaultStatus::Cleared
    }

    /// Uncleared faults ordered by id.
    pub fn outstanding(&self) -> Vec<BehaviorFault> {
        self.faults.values().cloned().collect()
    }

    /// Number of uncleared faults.
    pub fn len(&self) -> usize {
        self.faults.len()
    }

    /// Whether no fault is outstanding.
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}
