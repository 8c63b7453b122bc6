use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use repairlock_application::{
    AcquiredLease, CoordinationSession, LeaseCoordinator, LeaseHandle, RevocationNotifier,
    RevocationReason, SessionRequest, revocation_channel,
};
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{LockKey, Placement};
use tokio::sync::{Mutex, Notify};

type LeaseSlot = (Option<Placement>, LockKey);

struct HeldLease {
    session_id: String,
    holder_id: String,
    notifier: RevocationNotifier,
}

#[derive(Default)]
struct CoordinatorState {
    sessions: HashSet<String>,
    leases: HashMap<LeaseSlot, HeldLease>,
}

/// In-process lease coordinator used to exercise the run controller in tests.
///
/// It only arbitrates between runs sharing one process, so it never backs a
/// real fleet.
///
/// Session TTLs are not tracked; expiry is simulated with
/// [`InMemoryLeaseCoordinator::expire_session`].
#[derive(Default)]
pub struct InMemoryLeaseCoordinator {
    state: Mutex<CoordinatorState>,
    lease_freed: Notify,
    next_session: AtomicU64,
    unreachable: AtomicBool,
    deny_leases: AtomicBool,
    fail_releases: AtomicBool,
}

impl InMemoryLeaseCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes session creation fail as if the service were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes every lease acquisition fail.
    pub fn set_deny_leases(&self, deny_leases: bool) {
        self.deny_leases.store(deny_leases, Ordering::SeqCst);
    }

    /// Makes voluntary release fail; the lease stays held.
    pub fn set_fail_releases(&self, fail_releases: bool) {
        self.fail_releases.store(fail_releases, Ordering::SeqCst);
    }

    /// Returns the holder id currently bound to the lease slot, if any.
    pub async fn holder_of(&self, placement: Option<&Placement>, lock_key: &LockKey) -> Option<String> {
        self.state
            .lock()
            .await
            .leases
            .get(&(placement.cloned(), lock_key.clone()))
            .map(|held| held.holder_id.clone())
    }

    /// Expires a session, revoking every lease bound to it.
    ///
    /// Returns whether the session existed.
    pub async fn expire_session(&self, session_id: &str) -> bool {
        let revoked = {
            let mut state = self.state.lock().await;
            if !state.sessions.remove(session_id) {
                return false;
            }

            let slots: Vec<LeaseSlot> = state
                .leases
                .iter()
                .filter(|(_, held)| held.session_id == session_id)
                .map(|(slot, _)| slot.clone())
                .collect();
            slots
                .into_iter()
                .filter_map(|slot| state.leases.remove(&slot))
                .collect::<Vec<_>>()
        };

        for held in revoked {
            held.notifier.fire(RevocationReason::SessionExpired);
        }
        self.lease_freed.notify_waiters();
        true
    }
}

#[async_trait]
impl LeaseCoordinator for InMemoryLeaseCoordinator {
    async fn create_session(&self, request: SessionRequest) -> AppResult<CoordinationSession> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::CoordinationUnavailable(
                "in-memory coordinator marked unreachable".to_owned(),
            ));
        }

        let session_id = format!(
            "session-{}",
            self.next_session.fetch_add(1, Ordering::SeqCst)
        );
        self.state.lock().await.sessions.insert(session_id.clone());

        Ok(CoordinationSession {
            session_id,
            holder_id: request.holder_id,
            ttl: request.ttl,
            placement: request.placement,
        })
    }

    async fn acquire_lease(
        &self,
        session: CoordinationSession,
        lock_key: &LockKey,
    ) -> AppResult<AcquiredLease> {
        if self.deny_leases.load(Ordering::SeqCst) {
            return Err(AppError::LockAcquisition(format!(
                "lease on '{lock_key}' denied"
            )));
        }

        let slot = (session.placement.clone(), lock_key.clone());
        loop {
            let lease_freed = self.lease_freed.notified();
            {
                let mut state = self.state.lock().await;
                if !state.sessions.contains(&session.session_id) {
                    return Err(AppError::LockAcquisition(format!(
                        "session {} expired while waiting for '{lock_key}'",
                        session.session_id
                    )));
                }

                if !state.leases.contains_key(&slot) {
                    let (notifier, revocation) = revocation_channel();
                    state.leases.insert(
                        slot,
                        HeldLease {
                            session_id: session.session_id.clone(),
                            holder_id: session.holder_id.clone(),
                            notifier,
                        },
                    );

                    return Ok(AcquiredLease {
                        handle: LeaseHandle::new(lock_key.clone(), session),
                        revocation,
                    });
                }
            }
            lease_freed.await;
        }
    }

    async fn release_lease(&self, lease: LeaseHandle) -> AppResult<()> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(AppError::Internal(
                "in-memory coordinator release failure".to_owned(),
            ));
        }

        {
            let mut state = self.state.lock().await;
            let slot = (lease.session.placement.clone(), lease.lock_key.clone());
            if state
                .leases
                .get(&slot)
                .is_some_and(|held| held.session_id == lease.session.session_id)
            {
                state.leases.remove(&slot);
            }
            state.sessions.remove(&lease.session.session_id);
        }

        self.lease_freed.notify_waiters();
        Ok(())
    }

    async fn destroy_session(&self, session: &CoordinationSession) -> AppResult<()> {
        self.state
            .lock()
            .await
            .sessions
            .remove(&session.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
