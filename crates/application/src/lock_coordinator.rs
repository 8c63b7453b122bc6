//! Acquisition and best-effort release of the fleet-wide lease.

use std::sync::Arc;
use std::time::Duration;

use repairlock_core::{AppError, AppResult};
use repairlock_domain::{LockKey, Placement};
use tracing::{info, warn};

use crate::run_ports::{AcquiredLease, LeaseCoordinator, LeaseHandle, SessionRequest};

/// Default session time-to-live.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Session parameters used for every acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    /// Identity stored as the lease value.
    pub holder_id: String,
    /// Session time-to-live.
    pub session_ttl: Duration,
    /// Optional datacenter placement.
    pub placement: Option<Placement>,
}

impl LockSettings {
    /// Creates validated settings.
    pub fn new(
        holder_id: impl Into<String>,
        session_ttl: Duration,
        placement: Option<Placement>,
    ) -> AppResult<Self> {
        let holder_id = holder_id.into();
        if holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "lock holder_id must not be empty".to_owned(),
            ));
        }

        if session_ttl.as_secs() == 0 {
            return Err(AppError::Validation(
                "lock session ttl must be at least one second".to_owned(),
            ));
        }

        Ok(Self {
            holder_id,
            session_ttl,
            placement,
        })
    }
}

/// Application service binding sessions and leases for one run.
#[derive(Clone)]
pub struct LockCoordinator {
    coordinator: Arc<dyn LeaseCoordinator>,
    settings: LockSettings,
}

impl LockCoordinator {
    /// Creates a lock coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<dyn LeaseCoordinator>, settings: LockSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    /// Creates a session and blocks until the lease on `lock_key` is held.
    pub async fn acquire(&self, lock_key: &LockKey) -> AppResult<AcquiredLease> {
        let session = self
            .coordinator
            .create_session(SessionRequest {
                holder_id: self.settings.holder_id.clone(),
                ttl: self.settings.session_ttl,
                placement: self.settings.placement.clone(),
            })
            .await?;

        info!(
            lock_key = %lock_key,
            session_id = %session.session_id,
            ttl_seconds = session.ttl.as_secs(),
            "coordination session created, waiting for lease"
        );

        match self
            .coordinator
            .acquire_lease(session.clone(), lock_key)
            .await
        {
            Ok(acquired) => {
                info!(
                    lock_key = %lock_key,
                    session_id = %session.session_id,
                    holder_id = %session.holder_id,
                    "lease acquired"
                );
                Ok(acquired)
            }
            Err(error) => {
                if let Err(destroy_error) = self.coordinator.destroy_session(&session).await {
                    warn!(
                        session_id = %session.session_id,
                        error = %destroy_error,
                        "failed to destroy session after lease acquisition failure"
                    );
                }
                Err(error)
            }
        }
    }

    /// Gives the lease back. Failures are logged and never fatal: the
    /// session TTL releases the lease eventually.
    pub async fn release(&self, lease: LeaseHandle) {
        let lock_key = lease.lock_key.clone();
        let session_id = lease.session.session_id.clone();

        match self.coordinator.release_lease(lease).await {
            Ok(()) => info!(lock_key = %lock_key, session_id = %session_id, "lease released"),
            Err(error) => warn!(
                lock_key = %lock_key,
                session_id = %session_id,
                error = %error,
                "unable to release lease, it will expire with the session"
            ),
        }
    }
}
