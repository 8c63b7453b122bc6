//! Redis-backed sessions and exclusive leases.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use repairlock_application::{
    AcquiredLease, CoordinationSession, LeaseCoordinator, LeaseHandle, RevocationNotifier,
    RevocationReason, SessionRequest, revocation_channel,
};
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{LockKey, Placement};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[2], ARGV[2])
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Default wait between lease acquisition attempts.
pub const DEFAULT_ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(100);

/// Redis implementation of session and lease coordination.
///
/// A session is a key with a TTL. The lease key holds
/// `<holder_id>:<session_id>` with the same TTL; both are renewed every
/// third of the TTL while the lease is held.
#[derive(Clone)]
pub struct RedisLeaseCoordinator {
    client: redis::Client,
    key_prefix: String,
    retry_interval: Duration,
}

impl RedisLeaseCoordinator {
    /// Creates one coordinator adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            retry_interval: DEFAULT_ACQUIRE_RETRY_INTERVAL,
        }
    }

    /// Overrides the wait between acquisition attempts.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn scope_for(&self, placement: Option<&Placement>) -> String {
        match placement {
            Some(placement) => format!("{}:{}", self.key_prefix, placement.datacenter()),
            None => self.key_prefix.clone(),
        }
    }

    fn session_key_for(&self, session: &CoordinationSession) -> String {
        format!(
            "{}:session:{}",
            self.scope_for(session.placement.as_ref()),
            session.session_id
        )
    }

    fn lease_key_for(&self, placement: Option<&Placement>, lock_key: &LockKey) -> String {
        format!("{}:lease:{lock_key}", self.scope_for(placement))
    }

    async fn connect(
        &self,
        to_error: fn(String) -> AppError,
    ) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| to_error(format!("failed to connect to redis: {error}")))
    }
}

fn lease_token(session: &CoordinationSession) -> String {
    format!("{}:{}", session.holder_id, session.session_id)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn renew_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(MIN_RENEW_INTERVAL)
}

#[async_trait]
impl LeaseCoordinator for RedisLeaseCoordinator {
    async fn create_session(&self, request: SessionRequest) -> AppResult<CoordinationSession> {
        if request.holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "session holder_id must not be empty".to_owned(),
            ));
        }

        let session = CoordinationSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            holder_id: request.holder_id,
            ttl: request.ttl,
            placement: request.placement,
        };
        let session_key = self.session_key_for(&session);

        let mut connection = self.connect(AppError::CoordinationUnavailable).await?;
        let created: Option<String> = redis::cmd("SET")
            .arg(session_key.as_str())
            .arg(session.holder_id.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(session.ttl))
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::CoordinationUnavailable(format!("failed to create session: {error}"))
            })?;

        if created.is_none() {
            return Err(AppError::CoordinationUnavailable(format!(
                "session id collision for '{session_key}'"
            )));
        }

        Ok(session)
    }

    async fn acquire_lease(
        &self,
        session: CoordinationSession,
        lock_key: &LockKey,
    ) -> AppResult<AcquiredLease> {
        let lease_key = self.lease_key_for(session.placement.as_ref(), lock_key);
        let session_key = self.session_key_for(&session);
        let token = lease_token(&session);
        let ttl_ms = ttl_millis(session.ttl);

        let mut connection = self.connect(AppError::LockAcquisition).await?;
        let granted_at = loop {
            let sent_at = Instant::now();
            let acquired: Option<String> = redis::cmd("SET")
                .arg(lease_key.as_str())
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut connection)
                .await
                .map_err(|error| {
                    AppError::LockAcquisition(format!("failed to acquire lease: {error}"))
                })?;

            if acquired.is_some() {
                break sent_at;
            }

            let session_alive: bool = connection
                .pexpire(session_key.as_str(), i64::try_from(ttl_ms).unwrap_or(i64::MAX))
                .await
                .map_err(|error| {
                    AppError::LockAcquisition(format!("failed to renew session: {error}"))
                })?;

            if !session_alive {
                return Err(AppError::LockAcquisition(format!(
                    "session {} expired while waiting for '{lock_key}'",
                    session.session_id
                )));
            }

            debug!(lock_key = %lock_key, "lease held elsewhere, waiting");
            tokio::time::sleep(self.retry_interval).await;
        };

        let (keeper_stop, stop_signal) = oneshot::channel();
        let (notifier, revocation) = revocation_channel();
        tokio::spawn(keep_lease(
            LeaseKeeper {
                client: self.client.clone(),
                lease_key,
                session_key,
                token,
                ttl: session.ttl,
            },
            granted_at,
            stop_signal,
            notifier,
        ));

        Ok(AcquiredLease {
            handle: LeaseHandle::new(lock_key.clone(), session).with_keeper(keeper_stop),
            revocation,
        })
    }

    async fn release_lease(&self, mut lease: LeaseHandle) -> AppResult<()> {
        lease.stop_keeper();

        let lease_key = self.lease_key_for(lease.session.placement.as_ref(), &lease.lock_key);
        let session_key = self.session_key_for(&lease.session);
        let script = Script::new(RELEASE_LEASE_SCRIPT);

        let mut connection = self.connect(AppError::Internal).await?;

        script
            .key(lease_key)
            .arg(lease_token(&lease.session))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| AppError::Internal(format!("failed to release lease: {error}")))?;

        connection
            .del::<_, ()>(session_key.as_str())
            .await
            .map_err(|error| AppError::Internal(format!("failed to destroy session: {error}")))?;

        Ok(())
    }

    async fn destroy_session(&self, session: &CoordinationSession) -> AppResult<()> {
        let mut connection = self.connect(AppError::Internal).await?;

        connection
            .del::<_, ()>(self.session_key_for(session).as_str())
            .await
            .map_err(|error| AppError::Internal(format!("failed to destroy session: {error}")))
    }
}

struct LeaseKeeper {
    client: redis::Client,
    lease_key: String,
    session_key: String,
    token: String,
    ttl: Duration,
}

impl LeaseKeeper {
    async fn renew(&self) -> AppResult<bool> {
        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))?;

        let renewed = Script::new(RENEW_LEASE_SCRIPT)
            .key(self.lease_key.as_str())
            .key(self.session_key.as_str())
            .arg(self.token.as_str())
            .arg(ttl_millis(self.ttl))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| AppError::Internal(format!("failed to renew lease: {error}")))?;

        Ok(renewed > 0)
    }
}

/// Instant after which the lease must be treated as lost, given the last
/// successful renewal was sent at `sent_at`.
fn expiry_deadline(sent_at: Instant, ttl: Duration) -> Instant {
    sent_at + ttl.saturating_sub(renew_interval(ttl))
}

/// Renews the lease until stopped; fires `notifier` once the lease is lost.
///
/// The lease key expires `ttl` after the last renewal that reached Redis, so
/// revocation fires one renew interval ahead of that, even when Redis never
/// answers.
async fn keep_lease(
    keeper: LeaseKeeper,
    granted_at: Instant,
    mut stop_signal: oneshot::Receiver<()>,
    notifier: RevocationNotifier,
) {
    let interval = renew_interval(keeper.ttl);
    let mut deadline = expiry_deadline(granted_at, keeper.ttl);
    let mut ticker = tokio::time::interval_at(granted_at + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_signal => return,
            () = tokio::time::sleep_until(deadline) => break,
            _ = ticker.tick() => {}
        }

        let sent_at = Instant::now();
        let renewed = tokio::select! {
            biased;

            _ = &mut stop_signal => return,
            () = tokio::time::sleep_until(deadline) => break,
            renewed = tokio::time::timeout(interval, keeper.renew()) => renewed,
        };

        match renewed {
            Ok(Ok(true)) => deadline = expiry_deadline(sent_at, keeper.ttl),
            Ok(Ok(false)) => {
                warn!(lease_key = %keeper.lease_key, "lease is no longer held by this session");
                notifier.fire(RevocationReason::LeaseSuperseded);
                return;
            }
            Ok(Err(error)) => {
                warn!(lease_key = %keeper.lease_key, error = %error, "lease renewal failed, retrying");
            }
            Err(_) => {
                warn!(lease_key = %keeper.lease_key, "lease renewal timed out, retrying");
            }
        }
    }

    warn!(
        lease_key = %keeper.lease_key,
        "lease could not be renewed before it expires"
    );
    notifier.fire(RevocationReason::SessionExpired);
}
