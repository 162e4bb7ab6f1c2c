//! In-memory lease backend.
//!
//! [`InMemoryLeaseBackend`] keeps one lease in process memory. Share it
//! through an `Arc` between several gates to simulate replicas in tests, or
//! use it alone for a single-replica development deployment.
//!
//! ## Limitations
//!
//! - **NOT suitable for multi-replica production**: no cross-process coordination
//! - **No persistence**: the lease is lost when the process exits

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{LeaseBackend, LeadershipResult, RenewalResult};
use crate::errors::LeaseError;
use crate::LeaseIdentity;

#[derive(Debug, Clone)]
struct Lease {
    holder: LeaseIdentity,
    expires_at: Instant,
}

/// Single-process lease table.
#[derive(Debug, Default)]
pub struct InMemoryLeaseBackend {
    lease: RwLock<Option<Lease>>,
    unavailable: AtomicBool,
}

fn poison_err<T>(_: PoisonError<T>) -> LeaseError {
    LeaseError::Unavailable("lock poisoned".to_string())
}

impl InMemoryLeaseBackend {
    /// Creates a backend with no holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`LeaseError::Unavailable`] until cleared.
    ///
    /// Simulates an outage of the real lease store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The current holder, if the lease is held and unexpired.
    pub fn holder(&self) -> Option<LeaseIdentity> {
        let lease = self.lease.read().ok()?;
        lease
            .as_ref()
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.holder.clone())
    }

    fn check_available(&self) -> Result<(), LeaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LeaseError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LeaseBackend for InMemoryLeaseBackend {
    async fn try_acquire(
        &self,
        identity: &LeaseIdentity,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, LeaseError> {
        self.check_available()?;
        let mut lease = self.lease.write().map_err(poison_err)?;
        let now = Instant::now();

        if let Some(current) = lease.as_ref() {
            if current.expires_at > now && &current.holder != identity {
                return Ok(LeadershipResult::NotLeader {
                    current_leader: Some(current.holder.clone()),
                });
            }
        }

        *lease = Some(Lease {
            holder: identity.clone(),
            expires_at: now + lease_duration,
        });
        Ok(LeadershipResult::Acquired)
    }

    async fn renew(
        &self,
        identity: &LeaseIdentity,
        lease_duration: Duration,
    ) -> Result<RenewalResult, LeaseError> {
        self.check_available()?;
        let mut lease = self.lease.write().map_err(poison_err)?;
        let now = Instant::now();

        match lease.as_mut() {
            Some(current) if &current.holder == identity && current.expires_at > now => {
                current.expires_at = now + lease_duration;
                Ok(RenewalResult::Renewed)
            }
            _ => Ok(RenewalResult::Lost),
        }
    }

    async fn release(&self, identity: &LeaseIdentity) -> Result<bool, LeaseError> {
        self.check_available()?;
        let mut lease = self.lease.write().map_err(poison_err)?;

        match lease.as_ref() {
            Some(current) if &current.holder == identity => {
                *lease = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
