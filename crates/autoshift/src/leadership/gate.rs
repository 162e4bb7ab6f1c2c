//! The lease renewal loop.

use std::sync::Arc;

use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    LeaderCheck, LeaseBackend, LeaseTiming, LeadershipResult, LeadershipState, RenewalResult,
};
use crate::LeaseIdentity;

/// Observers of leadership transitions.
///
/// Called from the renewal task, only when the state actually changes. Keep
/// implementations quick; the next renewal waits for them.
pub trait LeadershipHooks: Send + Sync {
    /// This replica just became leader.
    fn on_started_leading(&self) {}

    /// This replica just stopped being leader.
    fn on_stopped_leading(&self) {}

    /// A different holder was observed (including this replica).
    fn on_new_leader(&self, _identity: &LeaseIdentity) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LeadershipHooks for NoopHooks {}

/// Drives a [`LeaseBackend`] and owns the only write access to [`LeadershipState`].
pub struct LeadershipGate {
    identity: LeaseIdentity,
    timing: LeaseTiming,
    backend: Arc<dyn LeaseBackend>,
    state: Arc<LeadershipState>,
    hooks: Arc<dyn LeadershipHooks>,
}

struct LoopState {
    last_renewed: Instant,
    observed_leader: Option<LeaseIdentity>,
}

impl LeadershipGate {
    /// Creates a gate in the "not leader" state.
    pub fn new(
        identity: LeaseIdentity,
        timing: LeaseTiming,
        backend: Arc<dyn LeaseBackend>,
    ) -> Self {
        Self {
            identity,
            timing,
            backend,
            state: Arc::new(LeadershipState::new()),
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Replaces the transition observers.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn LeadershipHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Read handle for request handlers.
    pub fn state(&self) -> Arc<LeadershipState> {
        Arc::clone(&self.state)
    }

    /// This replica's election identity.
    pub fn identity(&self) -> &LeaseIdentity {
        &self.identity
    }

    /// Runs the election until `cancel` fires, then releases the lease.
    ///
    /// Backend failures are logged and never end the loop.
    pub async fn start(&self, cancel: CancellationToken) {
        info!(
            identity = %self.identity,
            lease_duration_ms = self.timing.lease_duration().as_millis() as u64,
            renew_deadline_ms = self.timing.renew_deadline().as_millis() as u64,
            retry_period_ms = self.timing.retry_period().as_millis() as u64,
            "leader election started"
        );

        let mut loop_state = LoopState {
            last_renewed: Instant::now(),
            observed_leader: None,
        };

        loop {
            let attempt = async {
                if self.state.is_leader() {
                    self.renew(&mut loop_state).await;
                } else {
                    self.try_acquire(&mut loop_state).await;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = attempt => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.timing.retry_period()) => {}
            }
        }

        self.shutdown().await;
    }

    async fn try_acquire(&self, loop_state: &mut LoopState) {
        let attempt = timeout(
            self.timing.renew_deadline(),
            self.backend
                .try_acquire(&self.identity, self.timing.lease_duration()),
        )
        .await;

        match attempt {
            Ok(Ok(LeadershipResult::Acquired)) => {
                loop_state.last_renewed = Instant::now();
                self.observe_leader(loop_state, &self.identity);
                if self.state.promote() {
                    info!(identity = %self.identity, "acquired lease, started leading");
                    self.hooks.on_started_leading();
                }
            }
            Ok(Ok(LeadershipResult::NotLeader { current_leader })) => {
                debug!(
                    identity = %self.identity,
                    current_leader = current_leader.as_ref().map(|l| l.as_str()),
                    "lease held by another replica"
                );
                if let Some(leader) = current_leader {
                    self.observe_leader(loop_state, &leader);
                }
            }
            Ok(Err(error)) => {
                warn!(identity = %self.identity, %error, "lease backend unavailable, staying follower");
            }
            Err(_) => {
                warn!(identity = %self.identity, "lease acquisition timed out, staying follower");
            }
        }
    }

    async fn renew(&self, loop_state: &mut LoopState) {
        let deadline = loop_state.last_renewed + self.timing.renew_deadline();
        let attempt = timeout_at(
            deadline,
            self.backend
                .renew(&self.identity, self.timing.lease_duration()),
        )
        .await;

        match attempt {
            Ok(Ok(RenewalResult::Renewed)) => {
                loop_state.last_renewed = Instant::now();
                debug!(identity = %self.identity, "lease renewed");
            }
            Ok(Ok(RenewalResult::Lost)) => {
                self.step_down("lease lost");
            }
            Ok(Err(error)) if Instant::now() < deadline => {
                warn!(identity = %self.identity, %error, "lease renewal failed, will retry");
            }
            Ok(Err(error)) => {
                warn!(identity = %self.identity, %error, "lease renewal failed");
                self.step_down("renew deadline exceeded");
            }
            Err(_) => {
                self.step_down("renew deadline exceeded");
            }
        }
    }

    async fn shutdown(&self) {
        // Stop admitting mutations before the lease can move elsewhere.
        if self.state.demote() {
            self.hooks.on_stopped_leading();
        }

        // An acquire interrupted by cancellation may have committed without
        // promoting us, so release regardless; the backend checks the holder.
        let released = timeout(
            self.timing.renew_deadline(),
            self.backend.release(&self.identity),
        )
        .await;
        match released {
            Ok(Ok(true)) => info!(identity = %self.identity, "lease released on shutdown"),
            Ok(Ok(false)) => info!(identity = %self.identity, "leader election stopped, no lease held"),
            Ok(Err(error)) => warn!(identity = %self.identity, %error, "failed to release lease"),
            Err(_) => warn!(identity = %self.identity, "lease release timed out"),
        }
    }

    fn step_down(&self, reason: &'static str) {
        if self.state.demote() {
            warn!(identity = %self.identity, reason, "stopped leading");
            self.hooks.on_stopped_leading();
        }
    }

    fn observe_leader(&self, loop_state: &mut LoopState, leader: &LeaseIdentity) {
        if loop_state.observed_leader.as_ref() != Some(leader) {
            info!(identity = %self.identity, leader = %leader, "new leader observed");
            loop_state.observed_leader = Some(leader.clone());
            self.hooks.on_new_leader(leader);
        }
    }
}

impl LeaderCheck for LeadershipGate {
    fn is_leader(&self) -> bool {
        self.state.is_leader()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::leadership::InMemoryLeaseBackend;

    #[derive(Default)]
    struct RecordingHooks {
        started: AtomicUsize,
        stopped: AtomicUsize,
        leaders: Mutex<Vec<String>>,
    }

    impl LeadershipHooks for RecordingHooks {
        fn on_started_leading(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stopped_leading(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_new_leader(&self, identity: &LeaseIdentity) {
            self.leaders.lock().unwrap().push(identity.to_string());
        }
    }

    fn timing() -> LeaseTiming {
        LeaseTiming::new(
            Duration::from_secs(1),
            Duration::from_millis(500),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    fn gate(
        name: &str,
        backend: &Arc<InMemoryLeaseBackend>,
        hooks: &Arc<RecordingHooks>,
    ) -> Arc<LeadershipGate> {
        let backend: Arc<dyn LeaseBackend> = backend.clone();
        let hooks: Arc<dyn LeadershipHooks> = hooks.clone();
        Arc::new(
            LeadershipGate::new(LeaseIdentity::new(name).unwrap(), timing(), backend)
                .with_hooks(hooks),
        )
    }

    fn spawn(gate: &Arc<LeadershipGate>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let gate = Arc::clone(gate);
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.start(cancel).await })
    }

    #[tokio::test(start_paused = true)]
    async fn acquires_lease_and_fires_started_once() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        let hooks = Arc::new(RecordingHooks::default());
        let gate = gate("pod-a", &backend, &hooks);
        let cancel = CancellationToken::new();
        let task = spawn(&gate, &cancel);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(gate.is_leader());
        assert_eq!(hooks.started.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 0);
        assert_eq!(*hooks.leaders.lock().unwrap(), ["pod-a"]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_of_two_replicas_leads() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        let hooks_a = Arc::new(RecordingHooks::default());
        let hooks_b = Arc::new(RecordingHooks::default());
        let a = gate("pod-a", &backend, &hooks_a);
        let b = gate("pod-b", &backend, &hooks_b);
        let cancel = CancellationToken::new();
        let task_a = spawn(&a, &cancel);
        let task_b = spawn(&b, &cancel);

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!(a.is_leader() && b.is_leader()));
        }
        assert!(a.is_leader() ^ b.is_leader());

        cancel.cancel();
        task_a.await.unwrap();
        task_b.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_the_lease_for_a_successor() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        let hooks_a = Arc::new(RecordingHooks::default());
        let a = gate("pod-a", &backend, &hooks_a);
        let cancel_a = CancellationToken::new();
        let task_a = spawn(&a, &cancel_a);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.is_leader());

        let hooks_b = Arc::new(RecordingHooks::default());
        let b = gate("pod-b", &backend, &hooks_b);
        let cancel_b = CancellationToken::new();
        let task_b = spawn(&b, &cancel_b);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!b.is_leader());

        cancel_a.cancel();
        task_a.await.unwrap();
        assert!(!a.is_leader());
        assert_eq!(hooks_a.stopped.load(Ordering::SeqCst), 1);

        // Well inside the 1s lease: only an explicit release lets b in this fast.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(b.is_leader());
        assert_eq!(*hooks_b.leaders.lock().unwrap(), ["pod-a", "pod-b"]);

        cancel_b.cancel();
        task_b.await.unwrap();
    }

    /// Commits the lease, then answers late.
    struct SlowAcquire {
        inner: Arc<InMemoryLeaseBackend>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl LeaseBackend for SlowAcquire {
        async fn try_acquire(
            &self,
            identity: &LeaseIdentity,
            lease_duration: Duration,
        ) -> Result<LeadershipResult, crate::LeaseError> {
            let result = self.inner.try_acquire(identity, lease_duration).await;
            tokio::time::sleep(self.delay).await;
            result
        }

        async fn renew(
            &self,
            identity: &LeaseIdentity,
            lease_duration: Duration,
        ) -> Result<RenewalResult, crate::LeaseError> {
            self.inner.renew(identity, lease_duration).await
        }

        async fn release(&self, identity: &LeaseIdentity) -> Result<bool, crate::LeaseError> {
            self.inner.release(identity).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_committed_acquire_still_releases_the_lease() {
        let leases = Arc::new(InMemoryLeaseBackend::new());
        let backend: Arc<dyn LeaseBackend> = Arc::new(SlowAcquire {
            inner: Arc::clone(&leases),
            delay: Duration::from_millis(300),
        });
        let hooks = Arc::new(RecordingHooks::default());
        let hooks_dyn: Arc<dyn LeadershipHooks> = hooks.clone();
        let gate = Arc::new(
            LeadershipGate::new(LeaseIdentity::new("pod-a").unwrap(), timing(), backend)
                .with_hooks(hooks_dyn),
        );
        let cancel = CancellationToken::new();
        let task = spawn(&gate, &cancel);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(leases.holder().map(|h| h.to_string()).as_deref(), Some("pod-a"));
        assert!(!gate.is_leader());

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(leases.holder(), None);
        assert!(!gate.is_leader());
        assert_eq!(hooks.started.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn follower_stays_follower_while_backend_is_down() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        backend.set_unavailable(true);
        let hooks = Arc::new(RecordingHooks::default());
        let gate = gate("pod-a", &backend, &hooks);
        let cancel = CancellationToken::new();
        let task = spawn(&gate, &cancel);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!gate.is_leader());
        assert_eq!(hooks.started.load(Ordering::SeqCst), 0);

        backend.set_unavailable(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(gate.is_leader());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn leader_steps_down_after_renew_deadline() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        let hooks = Arc::new(RecordingHooks::default());
        let gate = gate("pod-a", &backend, &hooks);
        let cancel = CancellationToken::new();
        let task = spawn(&gate, &cancel);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(gate.is_leader());

        backend.set_unavailable(true);
        // Deadline is 500ms after the last successful renewal; lease is 1s.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!gate.is_leader());
        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
