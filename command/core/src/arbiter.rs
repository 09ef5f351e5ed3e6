//! Per-robot command arbiter.
//!
//! Admission validates in a fixed order and short-circuits on the first
//! failure: command structure, lease, clock sync, deadline, robot state.
//! Everything after the structural check runs under the write lock, and
//! nothing is mutated before the final step. Slot swaps, expiry, frozen
//! transitions and executor events all go through the same write lock;
//! feedback polls copy a snapshot under the read lock.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use robot_command_spec::{
    BehaviorFault, ClearBehaviorFaultRequest, ClearBehaviorFaultResponse,
    ClearBehaviorFaultStatus, CommandFeedback, CommandId, CommandKind, CommonError,
    ExecutionStatus, LeaseUseResult, ResponseHeader, RobotCommandFeedbackRequest,
    RobotCommandFeedbackResponse, RobotCommandRequest, RobotCommandResponse, RobotCommandStatus,
    SafePowerOffStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::clock::{ClockSyncOracle, LocalClock};
use crate::config::ArbiterConfig;
use crate::executor::{ExecutorBridge, ExecutorEvent, ExecutorEvents};
use crate::faults::FaultRegister;
use crate::feedback::{unknown_command_response, FeedbackSnapshot};
use crate::lease::LeaseValidator;
use crate::slot::CommandSlot;
use crate::{AdmissionError, FeedbackError};

/// Motor power as reported by the robot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Motors powered.
    On,
    /// Motors unpowered.
    #[default]
    Off,
}

/// Observable robot-level arbiter state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RobotState {
    /// Motor power.
    pub power: PowerState,
    /// Whether the frozen safety state is active.
    pub frozen: bool,
    /// Processing command, if any.
    pub active_command: Option<CommandId>,
    /// Highest identifier issued in this session.
    pub last_issued: CommandId,
    /// Number of uncleared behavior faults.
    pub outstanding_faults: usize,
}

/// External collaborators the arbiter depends on.
#[derive(Clone)]
pub struct ArbiterParts {
    /// Lease validator.
    pub leases: Arc<dyn LeaseValidator>,
    /// Client clock synchronization.
    pub clocks: Arc<dyn ClockSyncOracle>,
    /// Executor bridge.
    pub executor: Arc<dyn ExecutorBridge>,
    /// Robot-local time.
    pub clock: Arc<dyn LocalClock>,
}

#[derive(Debug)]
struct ArbiterState {
    slot: CommandSlot,
    faults: FaultRegister,
    power: PowerState,
    frozen: bool,
}

/// Single-writer command arbiter for one robot session.
pub struct CommandArbiter {
    config: ArbiterConfig,
    parts: ArbiterParts,
    state: RwLock<ArbiterState>,
    events: Mutex<ExecutorEvents>,
}

impl std::fmt::Debug for CommandArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandArbiter")
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl CommandArbiter {
    /// Create an arbiter draining executor updates from `events`.
    pub fn new(config: ArbiterConfig, parts: ArbiterParts, events: ExecutorEvents) -> Self {
        Self {
            state: RwLock::new(ArbiterState {
                slot: CommandSlot::new(config.history_depth, config.retired_status_depth),
                faults: FaultRegister::new(),
                power: PowerState::default(),
                frozen: false,
            }),
            config,
            parts,
            events: Mutex::new(events),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Validate and admit a command.
    pub fn submit(&self, request: RobotCommandRequest) -> RobotCommandResponse {
        let received = self.parts.clock.now();
        let span = info_span!(
            "submit",
            client = %request.header.client_name,
            robot_command_id = tracing::field::Empty,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut response = RobotCommandResponse {
            header: ResponseHeader::for_request(&request.header, received),
            ..RobotCommandResponse::default()
        };
        match self.admit(&request, &mut response.lease_use_result) {
            Ok(id) => {
                span.record("robot_command_id", &id);
                response.status = RobotCommandStatus::Ok;
                response.robot_command_id = id;
                response.message = format!("robot command {id} admitted");
            }
            Err(err) => {
                warn!(error = %err, "command rejected");
                response.status = err.status();
                response.message = err.to_string();
                if err.is_request_error() {
                    response.header.error = CommonError::invalid_request(err.to_string());
                }
            }
        }

        let elapsed = start.elapsed().as_millis() as u64;
        span.record("status", &response.status.as_str());
        span.record("latency_ms", &elapsed);
        response.header.response_timestamp = self.parts.clock.now();
        response
    }

    fn admit(
        &self,
        request: &RobotCommandRequest,
        lease_use_result: &mut LeaseUseResult,
    ) -> Result<CommandId, AdmissionError> {
        let command = request.command.as_ref().ok_or(AdmissionError::Malformed)?;
        let kind = command.kind().ok_or(AdmissionError::Unsupported)?;

        // Validation through install is one critical section.
        let mut state = self.state.write();
        self.absorb_events(&mut state);

        *lease_use_result = self.parts.leases.validate(&request.lease);
        if !lease_use_result.is_ok() {
            return Err(AdmissionError::Lease(lease_use_result.status));
        }

        let offset = self.parts.clocks.offset_for(&request.clock_identifier)?;
        let deadline = command.end_time().map(|end| offset.to_local(end));

        let now = self.parts.clock.now();
        if let Some(deadline) = deadline {
            if deadline <= now {
                return Err(AdmissionError::Expired { deadline, now });
            }
            let limit = now.saturating_add(self.config.max_command_horizon_ms);
            if deadline > limit {
                return Err(AdmissionError::TooDistant { deadline, limit });
            }
        }

        if state.power != PowerState::On && kind != CommandKind::SafePowerOff {
            return Err(AdmissionError::NotPoweredOn);
        }
        if state.frozen && !kind.is_frozen_safe() {
            return Err(AdmissionError::Frozen(kind));
        }

        if let Some(expired) = state.slot.expire(now) {
            info!(robot_command_id = expired, "command timed out before supersession");
            self.parts.executor.halt(expired);
        }
        let installed = state
            .slot
            .install(command.clone(), kind, request.lease.clone(), deadline, now);
        if let Some(previous) = installed.overridden {
            info!(
                robot_command_id = previous,
                overridden_by = installed.id,
                "command overridden"
            );
        }
        self.parts.executor.begin(installed.id, command);
        info!(
            robot_command_id = installed.id,
            kind = kind.as_str(),
            deadline = ?deadline,
            "command admitted"
        );
        Ok(installed.id)
    }

    /// Time out the active command if its deadline has passed.
    ///
    /// Also drains pending executor events. Returns the id that timed out.
    pub fn expire_tick(&self) -> Option<CommandId> {
        let now = self.parts.clock.now();
        let mut state = self.state.write();
        self.absorb_events(&mut state);
        let expired = state.slot.expire(now)?;
        info!(robot_command_id = expired, now, "command timed out");
        self.parts.executor.halt(expired);
        Some(expired)
    }

    /// Resolve a command's current state, running the expiry check first.
    ///
    /// The executor is queried with the lock released. If the instance left
    /// `Processing` meanwhile, the fresh terminal snapshot is returned instead,
    /// so live feedback is never paired with a stale status.
    pub fn command_status(&self, id: CommandId) -> Result<FeedbackSnapshot, FeedbackError> {
        self.expire_tick();
        let snapshot = {
            let state = self.state.read();
            FeedbackSnapshot::capture(&state.slot, id)?
        };
        if snapshot.status != ExecutionStatus::Processing {
            return Ok(snapshot);
        }
        let recorded = snapshot.feedback;
        let live = snapshot.with_live_feedback(self.parts.executor.as_ref());
        let current = {
            let state = self.state.read();
            FeedbackSnapshot::capture(&state.slot, id)?
        };
        if current.status != ExecutionStatus::Processing || live.feedback == recorded {
            return Ok(current);
        }
        Ok(FeedbackSnapshot {
            feedback: live.feedback,
            ..current
        })
    }

    /// Answer a feedback poll.
    pub fn feedback(&self, request: RobotCommandFeedbackRequest) -> RobotCommandFeedbackResponse {
        let received = self.parts.clock.now();
        let span = info_span!(
            "feedback",
            robot_command_id = request.robot_command_id,
            status = tracing::field::Empty
        );
        let _guard = span.enter();

        let header = ResponseHeader::for_request(&request.header, received);
        let mut response = match self.command_status(request.robot_command_id) {
            Ok(snapshot) => snapshot.into_response(header),
            Err(err) => {
                warn!(error = %err, "feedback for unknown command");
                unknown_command_response(header, err)
            }
        };
        span.record("status", &response.status.as_str());
        debug!(message = %response.message, "feedback served");
        response.header.response_timestamp = self.parts.clock.now();
        response
    }

    /// Enter or leave the frozen safety state.
    ///
    /// Entering halts a processing command outside the safe subset and returns
    /// its id; safe commands keep running. Leaving changes nothing retroactively.
    pub fn set_frozen(&self, frozen: bool) -> Option<CommandId> {
        let mut state = self.state.write();
        self.absorb_events(&mut state);
        let entering = frozen && !state.frozen;
        if state.frozen != frozen {
            info!(frozen, "frozen safety state changed");
        }
        state.frozen = frozen;
        if !entering {
            return None;
        }
        let forced = state.slot.freeze_unsafe()?;
        warn!(robot_command_id = forced, "command halted by frozen state");
        self.parts.executor.halt(forced);
        Some(forced)
    }

    /// Record motor power as reported by the robot.
    pub fn set_power_state(&self, power: PowerState) {
        let mut state = self.state.write();
        if state.power != power {
            info!(power = ?power, "motor power changed");
        }
        state.power = power;
    }

    /// Clear a behavior fault once its condition has resolved.
    pub fn clear_fault(&self, request: ClearBehaviorFaultRequest) -> ClearBehaviorFaultResponse {
        let received = self.parts.clock.now();
        let span = info_span!(
            "clear_fault",
            fault_id = request.behavior_fault_id,
            status = tracing::field::Empty
        );
        let _guard = span.enter();

        let mut response = ClearBehaviorFaultResponse {
            header: ResponseHeader::for_request(&request.header, received),
            lease_use_result: self.parts.leases.validate(&request.lease),
            status: ClearBehaviorFaultStatus::Unknown,
        };
        if response.lease_use_result.is_ok() {
            let mut state = self.state.write();
            self.absorb_events(&mut state);
            let executor = &self.parts.executor;
            response.status = state
                .faults
                .clear(request.behavior_fault_id, |id| executor.fault_resolved(id));
        } else {
            let status = response.lease_use_result.status;
            warn!(lease = ?status, "fault clear rejected");
            response.header.error =
                CommonError::invalid_request(format!("lease rejected: {status:?}"));
        }
        span.record("status", &response.status.as_str());
        response.header.response_timestamp = self.parts.clock.now();
        response
    }

    /// Uncleared faults ordered by id.
    pub fn outstanding_faults(&self) -> Vec<BehaviorFault> {
        let mut state = self.state.write();
        self.absorb_events(&mut state);
        state.faults.outstanding()
    }

    /// Robot-level state summary.
    pub fn robot_state(&self) -> RobotState {
        let mut state = self.state.write();
        self.absorb_events(&mut state);
        RobotState {
            power: state.power,
            frozen: state.frozen,
            active_command: state
                .slot
                .active()
                .filter(|inst| !inst.status.is_terminal())
                .map(|inst| inst.id),
            last_issued: state.slot.last_issued(),
            outstanding_faults: state.faults.len(),
        }
    }

    /// Number of instances currently processing (zero or one).
    pub fn processing_count(&self) -> usize {
        self.state.read().slot.processing_count()
    }

    fn absorb_events(&self, state: &mut ArbiterState) {
        for event in self.events.lock().drain() {
            match event {
                ExecutorEvent::Feedback { id, feedback } => {
                    if !state.slot.refine(id, feedback) {
                        debug!(robot_command_id = id, "stale executor feedback ignored");
                        continue;
                    }
                    debug!(robot_command_id = id, feedback = ?feedback, "executor feedback");
                    if feedback == CommandFeedback::SafePowerOff(SafePowerOffStatus::PowerOff) {
                        info!(robot_command_id = id, "motor power off after safe power-off");
                        state.power = PowerState::Off;
                    }
                }
                ExecutorEvent::FaultRaised(fault) => state.faults.record(fault),
            }
        }
    }
}
