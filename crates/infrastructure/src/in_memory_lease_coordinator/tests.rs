use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use repairlock_application::{
    JobExit, JobHandle, JobLauncher, LeaseCoordinator, LockCoordinator, LockSettings,
    ProcessSupervisor, RepairRunService, RepairRunSettings, RevocationReason, RevocationSignal,
    SessionRequest,
};
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{DEFAULT_METRIC_PREFIX, JobCommand, JobState, Keyspace, LockKey, Placement};

use super::InMemoryLeaseCoordinator;
use crate::{TextfileRunReportSink, TokioProcessJobLauncher};

fn session_request(holder_id: &str) -> SessionRequest {
    SessionRequest {
        holder_id: holder_id.to_owned(),
        ttl: Duration::from_secs(300),
        placement: None,
    }
}

fn lock_key() -> LockKey {
    LockKey::new("service/cassandra/repair", Some("events")).unwrap_or_else(|_| unreachable!())
}

fn keyspace() -> Keyspace {
    Keyspace::new("events").unwrap_or_else(|_| unreachable!())
}

fn scratch_directory() -> PathBuf {
    let directory = std::env::temp_dir().join(format!("repairlock-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&directory).unwrap_or_else(|_| unreachable!());
    directory
}

#[tokio::test]
async fn second_session_waits_until_release() {
    let coordinator = Arc::new(InMemoryLeaseCoordinator::new());
    let first = coordinator
        .create_session(session_request("node-a"))
        .await
        .unwrap_or_else(|_| unreachable!());
    let second = coordinator
        .create_session(session_request("node-b"))
        .await
        .unwrap_or_else(|_| unreachable!());

    let held = coordinator
        .acquire_lease(first, &lock_key())
        .await
        .unwrap_or_else(|_| unreachable!());

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.acquire_lease(second, &lock_key()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    assert_eq!(
        coordinator.holder_of(None, &lock_key()).await.as_deref(),
        Some("node-a")
    );

    assert!(coordinator.release_lease(held.handle).await.is_ok());

    let acquired = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(matches!(acquired, Ok(Ok(Ok(_)))));
    assert_eq!(
        coordinator.holder_of(None, &lock_key()).await.as_deref(),
        Some("node-b")
    );
}

#[tokio::test]
async fn placements_are_independent() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let mut west = session_request("node-a");
    west.placement = Placement::from_datacenter(Some("dc1"));
    let mut east = session_request("node-b");
    east.placement = Placement::from_datacenter(Some("dc2"));

    let west = coordinator.create_session(west).await.unwrap_or_else(|_| unreachable!());
    let east = coordinator.create_session(east).await.unwrap_or_else(|_| unreachable!());

    assert!(coordinator.acquire_lease(west, &lock_key()).await.is_ok());
    let east = tokio::time::timeout(
        Duration::from_millis(200),
        coordinator.acquire_lease(east, &lock_key()),
    )
    .await;
    assert!(matches!(east, Ok(Ok(_))));
}

#[tokio::test]
async fn expired_session_fires_revocation_once() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let session = coordinator
        .create_session(session_request("node-a"))
        .await
        .unwrap_or_else(|_| unreachable!());
    let session_id = session.session_id.clone();
    let mut held = coordinator
        .acquire_lease(session, &lock_key())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(held.revocation.try_fired().is_none());
    assert!(coordinator.expire_session(&session_id).await);
    assert!(!coordinator.expire_session(&session_id).await);

    assert_eq!(held.revocation.fired().await, RevocationReason::SessionExpired);
    assert!(coordinator.holder_of(None, &lock_key()).await.is_none());
}

#[tokio::test]
async fn released_lease_never_fires_revocation() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let session = coordinator
        .create_session(session_request("node-a"))
        .await
        .unwrap_or_else(|_| unreachable!());
    let held = coordinator
        .acquire_lease(session, &lock_key())
        .await
        .unwrap_or_else(|_| unreachable!());
    let mut revocation = held.revocation;

    assert!(coordinator.release_lease(held.handle).await.is_ok());

    let fired = tokio::time::timeout(Duration::from_millis(20), revocation.fired()).await;
    assert!(fired.is_err());
}

#[tokio::test]
async fn expired_session_cannot_acquire() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let session = coordinator
        .create_session(session_request("node-a"))
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(coordinator.expire_session(&session.session_id).await);

    let acquired = coordinator.acquire_lease(session, &lock_key()).await;

    assert!(matches!(acquired, Err(AppError::LockAcquisition(_))));
}

struct ConcurrencyProbe {
    running: AtomicUsize,
    max_running: AtomicUsize,
    completed: AtomicUsize,
}

struct ProbeLauncher {
    probe: Arc<ConcurrencyProbe>,
}

#[async_trait]
impl JobLauncher for ProbeLauncher {
    async fn launch(&self, _command: &JobCommand) -> AppResult<Box<dyn JobHandle>> {
        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_running.fetch_max(running, Ordering::SeqCst);
        Ok(Box::new(ProbeJob {
            probe: self.probe.clone(),
            state: JobState::Running,
        }))
    }
}

struct ProbeJob {
    probe: Arc<ConcurrencyProbe>,
    state: JobState,
}

#[async_trait]
impl JobHandle for ProbeJob {
    fn state(&self) -> JobState {
        self.state
    }

    async fn wait(&mut self) -> AppResult<JobExit> {
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.probe.running.fetch_sub(1, Ordering::SeqCst);
        self.probe.completed.fetch_add(1, Ordering::SeqCst);
        self.state = JobState::Completed;
        Ok(JobExit {
            status_code: Some(0),
            success: true,
            output: Vec::new(),
        })
    }

    async fn kill(&mut self) -> AppResult<()> {
        if !self.state.is_terminal() {
            self.probe.running.fetch_sub(1, Ordering::SeqCst);
            self.state = JobState::Killed;
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_never_overlap() {
    let coordinator = Arc::new(InMemoryLeaseCoordinator::new());
    let probe = Arc::new(ConcurrencyProbe {
        running: AtomicUsize::new(0),
        max_running: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
    });
    let directory = scratch_directory();

    let mut runs = Vec::new();
    for node in 0..6 {
        let settings = LockSettings::new(format!("node-{node}"), Duration::from_secs(300), None)
            .unwrap_or_else(|_| unreachable!());
        let job_command = JobCommand::nodetool_repair("nodetool", &keyspace(), Default::default())
            .unwrap_or_else(|_| unreachable!());
        let service = RepairRunService::new(
            ProcessSupervisor::new(Arc::new(ProbeLauncher {
                probe: probe.clone(),
            })),
            Arc::new(TextfileRunReportSink::new(
                directory.join(format!("node-{node}")),
                DEFAULT_METRIC_PREFIX,
            )),
            RepairRunSettings {
                keyspace: keyspace(),
                job_command,
            },
        )
        .with_lock(
            LockCoordinator::new(coordinator.clone(), settings),
            lock_key(),
        );
        std::fs::create_dir_all(directory.join(format!("node-{node}")))
            .unwrap_or_else(|_| unreachable!());

        runs.push(tokio::spawn(async move {
            service.run(RevocationSignal::never()).await
        }));
    }

    for run in runs {
        assert!(matches!(run.await, Ok(Ok(_))));
    }

    assert_eq!(probe.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(probe.completed.load(Ordering::SeqCst), 6);
    assert!(coordinator.holder_of(None, &lock_key()).await.is_none());

    let _ = std::fs::remove_dir_all(&directory);
}

enum InjectedFailure {
    CoordinationUnreachable,
    LeaseDenied,
    LaunchFails,
    JobExitsNonZero,
    LeaseRevokedMidRun,
}

async fn run_with_failure(failure: InjectedFailure) -> (AppResult<()>, String) {
    let coordinator = Arc::new(InMemoryLeaseCoordinator::new());
    let directory = scratch_directory();
    let job_command = match failure {
        InjectedFailure::LaunchFails => {
            JobCommand::new("/nonexistent/nodetool", vec!["repair".to_owned()])
        }
        InjectedFailure::JobExitsNonZero => {
            JobCommand::new("sh", vec!["-c".to_owned(), "exit 1".to_owned()])
        }
        _ => JobCommand::new("sleep", vec!["30".to_owned()]),
    }
    .unwrap_or_else(|_| unreachable!());

    match failure {
        InjectedFailure::CoordinationUnreachable => coordinator.set_unreachable(true),
        InjectedFailure::LeaseDenied => coordinator.set_deny_leases(true),
        _ => {}
    }

    let settings = LockSettings::new("node-a", Duration::from_secs(300), None)
        .unwrap_or_else(|_| unreachable!());
    let service = RepairRunService::new(
        ProcessSupervisor::new(Arc::new(TokioProcessJobLauncher::new())),
        Arc::new(TextfileRunReportSink::new(&directory, DEFAULT_METRIC_PREFIX)),
        RepairRunSettings {
            keyspace: keyspace(),
            job_command,
        },
    )
    .with_lock(LockCoordinator::new(coordinator.clone(), settings), lock_key());

    if matches!(failure, InjectedFailure::LeaseRevokedMidRun) {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            coordinator.expire_session("session-0").await;
        });
    }

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        service.run(RevocationSignal::never()),
    )
    .await
    .unwrap_or_else(|_| unreachable!());

    let contents = std::fs::read_to_string(directory.join("cassandra_repair_events.prom"))
        .unwrap_or_default();
    let _ = std::fs::remove_dir_all(&directory);

    (result.map(|_| ()), contents)
}

#[tokio::test]
async fn every_failure_stage_writes_failed_record() {
    let cases = [
        (InjectedFailure::CoordinationUnreachable, 3),
        (InjectedFailure::LeaseDenied, 4),
        (InjectedFailure::LaunchFails, 5),
        (InjectedFailure::JobExitsNonZero, 6),
        (InjectedFailure::LeaseRevokedMidRun, 7),
    ];

    for (failure, exit_code) in cases {
        let (result, contents) = run_with_failure(failure).await;

        assert!(result.is_err());
        assert_eq!(result.err().map(|error| error.exit_code()), Some(exit_code));
        assert!(contents.starts_with("cassandra_repair_success{keyspace=\"events\"} 0\n"));
        assert_eq!(contents.lines().count(), 4);
    }
}

#[tokio::test]
async fn failed_release_still_reports_success() {
    let coordinator = Arc::new(InMemoryLeaseCoordinator::new());
    coordinator.set_fail_releases(true);
    let directory = scratch_directory();
    let settings = LockSettings::new("node-a", Duration::from_secs(300), None)
        .unwrap_or_else(|_| unreachable!());
    let service = RepairRunService::new(
        ProcessSupervisor::new(Arc::new(TokioProcessJobLauncher::new())),
        Arc::new(TextfileRunReportSink::new(&directory, DEFAULT_METRIC_PREFIX)),
        RepairRunSettings {
            keyspace: keyspace(),
            job_command: JobCommand::new("true", Vec::new()).unwrap_or_else(|_| unreachable!()),
        },
    )
    .with_lock(LockCoordinator::new(coordinator, settings), lock_key());

    let result = service.run(RevocationSignal::never()).await;

    assert!(result.is_ok());
    let contents = std::fs::read_to_string(directory.join("cassandra_repair_events.prom"))
        .unwrap_or_default();
    assert!(contents.starts_with("cassandra_repair_success{keyspace=\"events\"} 1\n"));

    let _ = std::fs::remove_dir_all(&directory);
}
