//! Lease validation.
//!
//! The arbiter never interprets a lease itself; it forwards the token to a
//! [`LeaseValidator`] and reports the outcome. [`LeaseAuthority`] is an
//! in-process authority managing a single resource.

use parking_lot::RwLock;
use robot_command_spec::{Lease, LeaseUseResult, LeaseUseStatus};
use tracing::{info, warn};

/// Validates presented leases.
pub trait LeaseValidator: Send + Sync {
    /// Validate `lease` for command use. Must not mutate ownership.
    fn validate(&self, lease: &Lease) -> LeaseUseResult;
}

/// Most recent holders carried in a lease's `client_names`.
pub const CLIENT_CHAIN_DEPTH: usize = 8;

/// Lease ownership failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    /// Another client currently holds the resource.
    #[error("resource {resource} is held by {holder}")]
    AlreadyClaimed {
        /// Resource name.
        resource: String,
        /// Client holding it.
        holder: String,
    },
    /// The presented lease is not the current holder's lease.
    #[error("lease is not held: {0:?}")]
    NotHolder(LeaseUseStatus),
}

#[derive(Debug, Default)]
struct AuthorityState {
    epoch_counter: u64,
    epoch: String,
    /// Latest issued lease; `None` before the first issue.
    latest: Option<Lease>,
    /// Whether `latest` is currently held.
    held: bool,
}

/// Single-resource lease authority.
#[derive(Debug)]
pub struct LeaseAuthority {
    resource: String,
    state: RwLock<AuthorityState>,
}

impl LeaseAuthority {
    /// Create an authority for `resource` with a fresh epoch.
    pub fn new(resource: impl Into<String>) -> Self {
        let authority = Self {
            resource: resource.into(),
            state: RwLock::new(AuthorityState::default()),
        };
        authority.reset_epoch();
        authority
    }

    /// Resource managed by this authority.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Acquire the resource if nobody holds it.
    pub fn acquire(&self, client: &str) -> Result<Lease, LeaseError> {
        let mut state = self.state.write();
        if state.held {
            let holder = state
                .latest
                .as_ref()
                .and_then(|lease| lease.client_names.last().cloned())
                .unwrap_or_default();
            warn!(resource = %self.resource, %holder, %client, "lease acquire refused");
            return Err(LeaseError::AlreadyClaimed {
                resource: self.resource.clone(),
                holder,
            });
        }
        Ok(self.issue(&mut state, client))
    }

    /// Take the resource regardless of the current holder.
    pub fn take(&self, client: &str) -> Lease {
        let mut state = self.state.write();
        self.issue(&mut state, client)
    }

    /// Return a held lease.
    pub fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let mut state = self.state.write();
        let status = self.evaluate(&state, lease);
        if status != LeaseUseStatus::Ok {
            return Err(LeaseError::NotHolder(status));
        }
        state.held = false;
        info!(resource = %self.resource, "lease released");
        Ok(())
    }

    /// Start a new epoch; every previously issued lease becomes `WrongEpoch`.
    pub fn reset_epoch(&self) {
        let mut state = self.state.write();
        state.epoch_counter += 1;
        state.epoch = format!("{}-epoch-{}", self.resource, state.epoch_counter);
        state.latest = None;
        state.held = false;
    }

    /// Latest issued lease, held or not.
    pub fn latest(&self) -> Option<Lease> {
        self.state.read().latest.clone()
    }

    fn issue(&self, state: &mut AuthorityState, client: &str) -> Lease {
        let (sequence, mut client_names) = match &state.latest {
            Some(prev) => {
                let next = prev.sequence.first().copied().unwrap_or(0) + 1;
                (vec![next], prev.client_names.clone())
            }
            None => (vec![1], Vec::new()),
        };
        client_names.push(client.to_string());
        if client_names.len() > CLIENT_CHAIN_DEPTH {
            client_names.drain(..client_names.len() - CLIENT_CHAIN_DEPTH);
        }
        let lease = Lease {
            resource: self.resource.clone(),
            epoch: state.epoch.clone(),
            sequence,
            client_names,
        };
        info!(
            resource = %self.resource,
            epoch = %lease.epoch,
            sequence = ?lease.sequence,
            %client,
            "lease issued"
        );
        state.latest = Some(lease.clone());
        state.held = true;
        lease
    }

    fn evaluate(&self, state: &AuthorityState, lease: &Lease) -> LeaseUseStatus {
        if lease.is_empty() || lease.sequence.is_empty() {
            return LeaseUseStatus::Invalid;
        }
        if lease.resource != self.resource {
            return LeaseUseStatus::Unmanaged;
        }
        let Some(latest) = &state.latest else {
            return LeaseUseStatus::Revoked;
        };
        if lease.epoch != latest.epoch {
            return LeaseUseStatus::WrongEpoch;
        }
        match lease.sequence.cmp(&latest.sequence) {
            std::cmp::Ordering::Less => LeaseUseStatus::Older,
            std::cmp::Ordering::Greater => LeaseUseStatus::Invalid,
            std::cmp::Ordering::Equal if state.held => LeaseUseStatus::Ok,
            std::cmp::Ordering::Equal => LeaseUseStatus::Revoked,
        }
    }
}

impl LeaseValidator for LeaseAuthority {
    fn validate(&self, lease: &Lease) -> LeaseUseResult {
        let state = self.state.read();
        LeaseUseResult {
            status: self.evaluate(&state, lease),
            attempted_lease: lease.clone(),
            latest_known_lease: state.latest.clone(),
        }
    }
}
