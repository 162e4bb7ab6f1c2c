//! Leader election for the mutation path.
//!
//! Every replica receives the same webhook traffic; only the replica holding
//! the lease may mutate the cluster. The [`LeaseBackend`] trait is the port to
//! the external lease primitive, kept separate from the renewal loop in
//! [`LeadershipGate`] so each can be tested alone:
//!
//! - **Production**: the Kubernetes `Lease` adapter in the `kubernetes` crate
//! - **Testing / single replica**: [`InMemoryLeaseBackend`]
//!
//! ## Safety
//!
//! Mutual exclusion comes entirely from the lease primitive. The gate only
//! guarantees that this replica reports "leader" no longer than its last
//! successful renewal plus `renew_deadline`, which is shorter than the lease.

pub mod gate;
pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{AutoshiftError, LeaseError};
use crate::LeaseIdentity;

pub use gate::{LeadershipGate, LeadershipHooks, NoopHooks};
pub use memory::InMemoryLeaseBackend;

// ---------------------------------------------------------------------------
// Lease port
// ---------------------------------------------------------------------------

/// Result of a leadership acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipResult {
    /// The caller now holds the lease.
    Acquired,
    /// Another replica holds an unexpired lease.
    NotLeader {
        /// The current holder, if the backend reports one.
        current_leader: Option<LeaseIdentity>,
    },
}

impl LeadershipResult {
    /// Returns true if leadership was acquired.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Result of a lease renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalResult {
    /// The lease was extended.
    Renewed,
    /// The lease expired or was taken by another replica.
    Lost,
}

/// The external lease primitive.
///
/// Implementations provide mutual exclusion across processes; the gate never
/// second-guesses them.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Takes the lease if it is free, expired, or already ours.
    async fn try_acquire(
        &self,
        identity: &LeaseIdentity,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, LeaseError>;

    /// Extends a lease we hold.
    async fn renew(
        &self,
        identity: &LeaseIdentity,
        lease_duration: Duration,
    ) -> Result<RenewalResult, LeaseError>;

    /// Gives the lease up so another replica can take it immediately.
    ///
    /// Returns `false` if we no longer held it.
    async fn release(&self, identity: &LeaseIdentity) -> Result<bool, LeaseError>;
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Lease timing parameters.
///
/// `lease_duration > renew_deadline > retry_period > 0`. A leader that cannot
/// renew for `renew_deadline` steps down while its lease is still valid, so
/// no other replica can have taken over yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl LeaseTiming {
    /// Validates and builds a timing configuration.
    pub fn new(
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Result<Self, AutoshiftError> {
        if retry_period.is_zero() {
            return Err(config_error("retry period must be greater than zero"));
        }
        if renew_deadline <= retry_period {
            return Err(config_error("renew deadline must be greater than the retry period"));
        }
        if lease_duration <= renew_deadline {
            return Err(config_error("lease duration must be greater than the renew deadline"));
        }
        Ok(Self {
            lease_duration,
            renew_deadline,
            retry_period,
        })
    }

    /// How long an acquired lease stays valid without renewal.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// How long a leader keeps trying to renew before stepping down.
    pub fn renew_deadline(&self) -> Duration {
        self.renew_deadline
    }

    /// Interval between acquisition or renewal attempts.
    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

fn config_error(message: &str) -> AutoshiftError {
    AutoshiftError::ConfigurationError {
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Leadership state
// ---------------------------------------------------------------------------

/// Read side of the leadership flag, consulted before every mutation.
pub trait LeaderCheck: Send + Sync {
    /// Non-blocking; safe to call from any number of tasks.
    fn is_leader(&self) -> bool;
}

/// The process-wide leadership flag.
///
/// Starts as "not leader". Only [`LeadershipGate`] can change it; everything
/// else reads it through [`LeaderCheck`].
#[derive(Debug, Default)]
pub struct LeadershipState {
    leader: AtomicBool,
}

impl LeadershipState {
    /// Creates the flag in the "not leader" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this replica leader. Returns `true` if that is a change.
    pub(crate) fn promote(&self) -> bool {
        !self.leader.swap(true, Ordering::AcqRel)
    }

    /// Clears leadership. Returns `true` if that is a change.
    pub(crate) fn demote(&self) -> bool {
        self.leader.swap(false, Ordering::AcqRel)
    }
}

impl LeaderCheck for LeadershipState {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }
}
