//! Executor bridge.
//!
//! Executors drive actuators asynchronously. The arbiter calls into them
//! through [`ExecutorBridge`] (begin, halt, non-blocking queries); executors
//! report back only by sending [`ExecutorEvent`]s through an
//! [`ExecutorSink`], which the arbiter drains at its serialization point.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use robot_command_spec::{
    BehaviorFault, BehaviorFaultId, CommandFeedback, CommandId, FaultCause, RobotCommand,
    Timestamp,
};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Executor-side contract. Every call must return without waiting on motion.
pub trait ExecutorBridge: Send + Sync {
    /// Start executing an admitted command. Supersedes whatever was running.
    fn begin(&self, id: CommandId, command: &RobotCommand);
    /// Stop executing `id` (timed out or frozen).
    fn halt(&self, id: CommandId);
    /// Latest sub-status for `id`, if the executor still tracks it.
    fn query_feedback(&self, id: CommandId) -> Option<CommandFeedback>;
    /// Whether the condition behind `fault_id` has resolved.
    fn fault_resolved(&self, fault_id: BehaviorFaultId) -> bool;
}

/// Updates pushed from an executor into the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    /// Refined sub-status for a command.
    Feedback {
        /// Command the update refers to.
        id: CommandId,
        /// New sub-status.
        feedback: CommandFeedback,
    },
    /// A safety condition halted behavior.
    FaultRaised(BehaviorFault),
}

/// Sending half handed to executors.
#[derive(Debug, Clone)]
pub struct ExecutorSink {
    tx: UnboundedSender<ExecutorEvent>,
}

impl ExecutorSink {
    /// Queue an event for the arbiter. Dropped silently once the arbiter is gone.
    pub fn send(&self, event: ExecutorEvent) {
        if self.tx.send(event).is_err() {
            debug!("executor event dropped: arbiter receiver closed");
        }
    }
}

/// Receiving half owned by the arbiter.
#[derive(Debug)]
pub struct ExecutorEvents {
    rx: UnboundedReceiver<ExecutorEvent>,
}

impl ExecutorEvents {
    /// Take every event queued so far without waiting.
    pub fn drain(&mut self) -> Vec<ExecutorEvent> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

/// Create a connected sink/receiver pair.
pub fn executor_channel() -> (ExecutorSink, ExecutorEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ExecutorSink { tx }, ExecutorEvents { rx })
}

/// Entries kept in each of the simulated executor's call logs.
const CALL_LOG_DEPTH: usize = 256;

#[derive(Debug, Default)]
struct SimState {
    current: Option<CommandId>,
    begun: VecDeque<CommandId>,
    halted: VecDeque<CommandId>,
    feedback: HashMap<CommandId, CommandFeedback>,
    faults: HashMap<BehaviorFaultId, bool>,
}

fn log_call(log: &mut VecDeque<CommandId>, id: CommandId) {
    log.push_back(id);
    if log.len() > CALL_LOG_DEPTH {
        log.pop_front();
    }
}

/// In-process executor that records calls and lets the host script progress.
///
/// Only the executing command's sub-status is tracked; call logs keep the
/// most recent entries.
#[derive(Debug)]
pub struct SimulatedExecutor {
    sink: ExecutorSink,
    state: Mutex<SimState>,
}

impl SimulatedExecutor {
    /// Create an executor reporting through `sink`.
    pub fn new(sink: ExecutorSink) -> Self {
        Self {
            sink,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Update a command's sub-status and notify the arbiter.
    pub fn report_feedback(&self, id: CommandId, feedback: CommandFeedback) {
        {
            let mut state = self.state.lock();
            if state.current == Some(id) {
                state.feedback.insert(id, feedback);
            }
        }
        self.sink.send(ExecutorEvent::Feedback { id, feedback });
    }

    /// Raise a behavior fault; its condition stays unresolved until [`Self::resolve_fault`].
    pub fn raise_fault(
        &self,
        id: BehaviorFaultId,
        cause: FaultCause,
        onset_timestamp: Timestamp,
    ) -> BehaviorFault {
        let fault = BehaviorFault {
            id,
            onset_timestamp,
            cause,
        };
        self.state.lock().faults.insert(id, false);
        self.sink.send(ExecutorEvent::FaultRaised(fault.clone()));
        fault
    }

    /// Mark a fault's underlying condition as resolved.
    pub fn resolve_fault(&self, id: BehaviorFaultId) {
        if let Some(resolved) = self.state.lock().faults.get_mut(&id) {
            *resolved = true;
        }
    }

    /// Command currently executing.
    pub fn current(&self) -> Option<CommandId> {
        self.state.lock().current
    }

    /// Most recently begun commands, in order.
    pub fn begun(&self) -> Vec<CommandId> {
        self.state.lock().begun.iter().copied().collect()
    }

    /// Most recently halted commands, in order.
    pub fn halted(&self) -> Vec<CommandId> {
        self.state.lock().halted.iter().copied().collect()
    }

    /// Number of commands with tracked sub-status.
    pub fn tracked(&self) -> usize {
        self.state.lock().feedback.len()
    }
}

impl ExecutorBridge for SimulatedExecutor {
    fn begin(&self, id: CommandId, command: &RobotCommand) {
        let mut state = self.state.lock();
        let initial = command
            .kind()
            .map(CommandFeedback::initial_for)
            .unwrap_or_default();
        if let Some(previous) = state.current.replace(id) {
            state.feedback.remove(&previous);
        }
        log_call(&mut state.begun, id);
        state.feedback.insert(id, initial);
        debug!(robot_command_id = id, "simulated execution started");
    }

    fn halt(&self, id: CommandId) {
        let mut state = self.state.lock();
        if state.current == Some(id) {
            state.current = None;
        }
        state.feedback.remove(&id);
        log_call(&mut state.halted, id);
        debug!(robot_command_id = id, "simulated execution halted");
    }

    fn query_feedback(&self, id: CommandId) -> Option<CommandFeedback> {
        self.state.lock().feedback.get(&id).copied()
    }

    fn fault_resolved(&self, fault_id: BehaviorFaultId) -> bool {
        let mut state = self.state.lock();
        let resolved = state.faults.get(&fault_id).copied().unwrap_or(false);
        if resolved {
            // Resolution is reported once; the arbiter drops the fault on it.
            state.faults.remove(&fault_id);
        }
        resolved
    }
}
