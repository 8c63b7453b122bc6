use std::time::Duration;

use async_trait::async_trait;
use repairlock_core::AppResult;
use repairlock_domain::{LockKey, Placement};
use tokio::sync::oneshot;

use super::revocation::RevocationSignal;

/// Parameters for one coordination session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Identity written as the lease value (hostname by default).
    pub holder_id: String,
    /// Session time-to-live.
    pub ttl: Duration,
    /// Optional datacenter placement.
    pub placement: Option<Placement>,
}

/// Session issued by the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationSession {
    /// Service-issued session identifier.
    pub session_id: String,
    /// Lease holder identity.
    pub holder_id: String,
    /// Session time-to-live.
    pub ttl: Duration,
    /// Optional datacenter placement.
    pub placement: Option<Placement>,
}

/// Held lease, usable for voluntary release.
#[derive(Debug)]
pub struct LeaseHandle {
    /// Key the lease is held on.
    pub lock_key: LockKey,
    /// Session the lease is bound to.
    pub session: CoordinationSession,
    keeper_stop: Option<oneshot::Sender<()>>,
}

impl LeaseHandle {
    /// Creates a lease handle without a background keeper.
    #[must_use]
    pub fn new(lock_key: LockKey, session: CoordinationSession) -> Self {
        Self {
            lock_key,
            session,
            keeper_stop: None,
        }
    }

    /// Attaches the stop channel of the task renewing this lease.
    #[must_use]
    pub fn with_keeper(mut self, keeper_stop: oneshot::Sender<()>) -> Self {
        self.keeper_stop = Some(keeper_stop);
        self
    }

    /// Stops lease renewal. Idempotent.
    pub fn stop_keeper(&mut self) {
        if let Some(keeper_stop) = self.keeper_stop.take() {
            let _ = keeper_stop.send(());
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        self.stop_keeper();
    }
}

/// Lease handle plus the signal reporting its involuntary loss.
#[derive(Debug)]
pub struct AcquiredLease {
    /// Handle for voluntary release.
    pub handle: LeaseHandle,
    /// Fires once if the lease is lost before release.
    pub revocation: RevocationSignal,
}

/// Coordination service port for sessions and exclusive leases.
#[async_trait]
pub trait LeaseCoordinator: Send + Sync {
    /// Creates one session with a time-to-live.
    ///
    /// Fails with `AppError::CoordinationUnavailable` when the service cannot
    /// be reached or rejects the session.
    async fn create_session(&self, request: SessionRequest) -> AppResult<CoordinationSession>;

    /// Waits until the lease on `lock_key` is bound to `session`.
    ///
    /// Fails with `AppError::LockAcquisition` when the lease cannot be
    /// obtained. Dropping the returned future abandons the wait.
    async fn acquire_lease(
        &self,
        session: CoordinationSession,
        lock_key: &LockKey,
    ) -> AppResult<AcquiredLease>;

    /// Voluntarily gives the lease back and destroys its session.
    async fn release_lease(&self, lease: LeaseHandle) -> AppResult<()>;

    /// Destroys a session that never obtained a lease.
    async fn destroy_session(&self, session: &CoordinationSession) -> AppResult<()>;
}
