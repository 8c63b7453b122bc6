//! Top-level run controller: acquire, run under lease, release, report.

use std::sync::Arc;

use chrono::Utc;
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{JobCommand, Keyspace, LockKey, RunMetrics, RunRecord};
use tracing::{error, info};

use crate::lock_coordinator::LockCoordinator;
use crate::process_supervisor::ProcessSupervisor;
use crate::run_ports::{RevocationSignal, RunReportSink};

/// What one run repairs and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRunSettings {
    /// Keyspace label of the run record.
    pub keyspace: Keyspace,
    /// Job invocation.
    pub job_command: JobCommand,
}

#[derive(Clone)]
struct RunLock {
    coordinator: LockCoordinator,
    lock_key: LockKey,
}

/// Runs one repair end to end and always reports the outcome.
#[derive(Clone)]
pub struct RepairRunService {
    supervisor: ProcessSupervisor,
    report_sink: Arc<dyn RunReportSink>,
    settings: RepairRunSettings,
    lock: Option<RunLock>,
}

impl RepairRunService {
    /// Creates a run service without fleet-wide locking.
    #[must_use]
    pub fn new(
        supervisor: ProcessSupervisor,
        report_sink: Arc<dyn RunReportSink>,
        settings: RepairRunSettings,
    ) -> Self {
        Self {
            supervisor,
            report_sink,
            settings,
            lock: None,
        }
    }

    /// Guards the job with an exclusive lease on `lock_key`.
    #[must_use]
    pub fn with_lock(mut self, coordinator: LockCoordinator, lock_key: LockKey) -> Self {
        self.lock = Some(RunLock {
            coordinator,
            lock_key,
        });
        self
    }

    /// Executes the run and writes the run record exactly once.
    ///
    /// `shutdown` is merged into the lease revocation signal, so an operator
    /// interrupt follows the same kill path as a lost lease. The record is
    /// written on every path; a failed write is returned in place of the run
    /// outcome.
    pub async fn run(&self, mut shutdown: RevocationSignal) -> AppResult<RunRecord> {
        let mut metrics = RunMetrics::start(self.settings.keyspace.clone(), Utc::now());

        let outcome = self.execute(&mut metrics, &mut shutdown).await;
        let record = metrics.finalize(Utc::now(), outcome.is_ok());

        if let Err(write_error) = self.report_sink.write_report(&record).await {
            if let Err(run_error) = &outcome {
                error!(keyspace = %record.keyspace, error = %run_error, "repair failed");
            }
            return Err(write_error);
        }

        match outcome {
            Ok(()) => {
                info!(
                    keyspace = %record.keyspace,
                    repair_duration_ms = record.repair_duration_ms,
                    total_duration_ms = record.total_duration_ms,
                    "repair succeeded"
                );
                Ok(record)
            }
            Err(run_error) => Err(run_error),
        }
    }

    async fn execute(
        &self,
        metrics: &mut RunMetrics,
        shutdown: &mut RevocationSignal,
    ) -> AppResult<()> {
        let (lease, revocation) = match &self.lock {
            Some(lock) => {
                metrics.mark_lock_started(Utc::now());
                let acquired = tokio::select! {
                    biased;

                    reason = shutdown.fired() => {
                        return Err(AppError::Interrupted(format!(
                            "{reason} while waiting for lease on '{}'",
                            lock.lock_key
                        )));
                    }

                    acquired = lock.coordinator.acquire(&lock.lock_key) => acquired?,
                };
                metrics.mark_lock_finished(Utc::now());
                (Some(acquired.handle), acquired.revocation)
            }
            None => (None, RevocationSignal::never()),
        };

        let revocation = revocation.merge(std::mem::take(shutdown));

        info!(
            keyspace = %metrics.keyspace(),
            command = %self.settings.job_command,
            "starting repair"
        );
        metrics.mark_repair_started(Utc::now());
        let result = self
            .supervisor
            .run_under_lease(&self.settings.job_command, revocation)
            .await;
        metrics.mark_repair_finished(Utc::now());

        if let (Some(lock), Some(lease)) = (&self.lock, lease) {
            lock.coordinator.release(lease).await;
        }

        result.map(|_| ())
    }
}
