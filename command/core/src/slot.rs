//! The command slot: at most one occupant plus a bounded history of retired
//! instances, and the identifier counter for the robot session.
//!
//! Instances pushed out of history leave a compact `(id, status)` record so
//! their terminal status stays reportable for a further, larger window.
//!
//! The slot is plain data; the arbiter provides the locking around it.

use std::collections::VecDeque;

use robot_command_spec::{
    CommandFeedback, CommandId, CommandKind, ExecutionStatus, Lease, RobotCommand, Timestamp,
};

/// An admitted command and its execution state.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInstance {
    /// Server-assigned identifier.
    pub id: CommandId,
    /// Flattened kind.
    pub kind: CommandKind,
    /// Admitted payload.
    pub command: RobotCommand,
    /// Lease the command was admitted under.
    pub lease: Lease,
    /// Robot-time deadline, if the command carried an end time.
    pub deadline: Option<Timestamp>,
    /// Robot time at admission.
    pub admitted_at: Timestamp,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Last known sub-status.
    pub feedback: CommandFeedback,
    /// Diagnostic message for the current status.
    pub message: String,
}

impl CommandInstance {
    fn retire(&mut self, status: ExecutionStatus, message: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.message = message;
        true
    }
}

/// Result of resolving an identifier against the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotLookup<'a> {
    /// The current occupant.
    Active(&'a CommandInstance),
    /// A retired instance still in history.
    Retained(&'a CommandInstance),
    /// Dropped from history; only the terminal status is kept.
    Evicted(ExecutionStatus),
    /// Issued earlier but older than every retained record.
    Forgotten,
    /// Never issued in this session.
    NeverIssued,
}

/// Outcome of installing a new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    /// Identifier of the new occupant.
    pub id: CommandId,
    /// Previous occupant that was processing and is now overridden.
    pub overridden: Option<CommandId>,
}

/// Single-active-command register.
#[derive(Debug, Clone)]
pub struct CommandSlot {
    active: Option<CommandInstance>,
    history: VecDeque<CommandInstance>,
    history_depth: usize,
    /// Terminal statuses of evicted instances, ascending by id.
    retired: VecDeque<(CommandId, ExecutionStatus)>,
    retired_depth: usize,
    last_issued: CommandId,
}

impl CommandSlot {
    /// Create an empty slot keeping up to `history_depth` retired instances
    /// and the final status of up to `retired_depth` evicted ones.
    pub fn new(history_depth: usize, retired_depth: usize) -> Self {
        let history_depth = history_depth.max(1);
        Self {
            active: None,
            history: VecDeque::with_capacity(history_depth),
            history_depth,
            retired: VecDeque::new(),
            retired_depth,
            last_issued: 0,
        }
    }

    /// Current occupant, processing or not.
    pub fn active(&self) -> Option<&CommandInstance> {
        self.active.as_ref()
    }

    /// Highest identifier issued so far (zero before the first admission).
    pub fn last_issued(&self) -> CommandId {
        self.last_issued
    }

    /// Retired instances, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &CommandInstance> {
        self.history.iter()
    }

    /// Number of instances currently `Processing` (zero or one).
    pub fn processing_count(&self) -> usize {
        self.active
            .iter()
            .chain(self.history.iter())
            .filter(|inst| inst.status == ExecutionStatus::Processing)
            .count()
    }

    /// Install a new occupant, overriding a processing predecessor.
    pub fn install(
        &mut self,
        command: RobotCommand,
        kind: CommandKind,
        lease: Lease,
        deadline: Option<Timestamp>,
        now: Timestamp,
    ) -> Installed {
        self.last_issued += 1;
        let id = self.last_issued;

        let mut overridden = None;
        if let Some(mut previous) = self.active.take() {
            if previous.retire(
                ExecutionStatus::Overridden,
                format!("command overridden by robot command {id}"),
            ) {
                overridden = Some(previous.id);
            }
            self.history.push_back(previous);
            while self.history.len() > self.history_depth {
                if let Some(evicted) = self.history.pop_front() {
                    self.retired.push_back((evicted.id, evicted.status));
                }
            }
            while self.retired.len() > self.retired_depth {
                self.retired.pop_front();
            }
        }

        self.active = Some(CommandInstance {
            id,
            kind,
            command,
            lease,
            deadline,
            admitted_at: now,
            status: ExecutionStatus::Processing,
            feedback: CommandFeedback::initial_for(kind),
            message: "command is executing".into(),
        });
        Installed { id, overridden }
    }

    /// Time out the occupant if it is processing and its deadline has passed.
    pub fn expire(&mut self, now: Timestamp) -> Option<CommandId> {
        let active = self.active.as_mut()?;
        let deadline = active.deadline?;
        if now < deadline {
            return None;
        }
        active
            .retire(
                ExecutionStatus::TimedOut,
                format!("command end time {deadline} elapsed at robot time {now}"),
            )
            .then_some(active.id)
    }

    /// Force a processing occupant outside the frozen-safe subset to `RobotFrozen`.
    pub fn freeze_unsafe(&mut self) -> Option<CommandId> {
        let active = self.active.as_mut()?;
        if active.kind.is_frozen_safe() {
            return None;
        }
        active
            .retire(
                ExecutionStatus::RobotFrozen,
                "robot entered the frozen safety state".into(),
            )
            .then_some(active.id)
    }

    /// Record a sub-status for the processing occupant. Ignored for any other id
    /// or for feedback of the wrong family.
    pub fn refine(&mut self, id: CommandId, feedback: CommandFeedback) -> bool {
        match self.active.as_mut() {
            Some(active)
                if active.id == id
                    && active.status == ExecutionStatus::Processing
                    && feedback.fits(active.kind) =>
            {
                active.feedback = feedback;
                true
            }
            _ => false,
        }
    }

    /// Resolve an identifier.
    pub fn lookup(&self, id: CommandId) -> SlotLookup<'_> {
        if id == 0 || id > self.last_issued {
            return SlotLookup::NeverIssued;
        }
        if let Some(active) = self.active.as_ref().filter(|inst| inst.id == id) {
            return SlotLookup::Active(active);
        }
        if let Some(inst) = self.history.iter().find(|inst| inst.id == id) {
            return SlotLookup::Retained(inst);
        }
        match self.retired.binary_search_by_key(&id, |(retired, _)| *retired) {
            Ok(idx) => SlotLookup::Evicted(self.retired[idx].1),
            Err(_) => SlotLookup::Forgotten,
        }
    }
}
