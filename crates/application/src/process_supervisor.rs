//! Runs the external job and races its exit against lease revocation.

use std::sync::Arc;

use repairlock_core::{AppError, AppResult};
use repairlock_domain::JobCommand;
use tracing::{info, warn};

use crate::run_ports::{JobLauncher, RevocationReason, RevocationSignal};

/// Natural, successful job termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Exit code reported by the process.
    pub status_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: Vec<u8>,
}

/// Supervises exactly one job process per call.
#[derive(Clone)]
pub struct ProcessSupervisor {
    launcher: Arc<dyn JobLauncher>,
}

impl ProcessSupervisor {
    /// Creates a supervisor.
    #[must_use]
    pub fn new(launcher: Arc<dyn JobLauncher>) -> Self {
        Self { launcher }
    }

    /// Runs `command` until it exits or `revocation` fires, whichever is first.
    ///
    /// When revocation wins the job is killed before this returns. When both
    /// are ready at once revocation wins. No job process outlives this call.
    pub async fn run_under_lease(
        &self,
        command: &JobCommand,
        mut revocation: RevocationSignal,
    ) -> AppResult<JobOutcome> {
        if let Some(reason) = revocation.try_fired() {
            return Err(revoked_error(reason, "before the job started"));
        }

        let mut job = self.launcher.launch(command).await?;
        info!(command = %command, "job started");

        tokio::select! {
            biased;

            reason = revocation.fired() => {
                warn!(command = %command, reason = %reason, "revocation received, killing job");
                if let Err(error) = job.kill().await {
                    warn!(command = %command, error = %error, "failed to kill job");
                }
                Err(revoked_error(reason, "while the job was running"))
            }

            exit = job.wait() => match exit {
                Ok(exit) if exit.success => {
                    info!(
                        command = %command,
                        output = %String::from_utf8_lossy(&exit.output),
                        "job finished"
                    );
                    Ok(JobOutcome {
                        status_code: exit.status_code,
                        output: exit.output,
                    })
                }
                Ok(exit) => {
                    let status = exit
                        .status_code
                        .map_or_else(|| "signal".to_owned(), |code| code.to_string());
                    warn!(
                        command = %command,
                        status = %status,
                        output = %String::from_utf8_lossy(&exit.output),
                        "job exited unsuccessfully"
                    );
                    Err(AppError::JobExecution(format!(
                        "'{command}' exited with status {status}"
                    )))
                }
                Err(error) => {
                    if let Err(kill_error) = job.kill().await {
                        warn!(command = %command, error = %kill_error, "failed to kill job");
                    }
                    Err(error)
                }
            },
        }
    }
}

fn revoked_error(reason: RevocationReason, when: &str) -> AppError {
    match reason {
        RevocationReason::OperatorShutdown => {
            AppError::Interrupted(format!("operator shutdown {when}"))
        }
        RevocationReason::SessionExpired | RevocationReason::LeaseSuperseded => {
            AppError::LeaseRevoked(format!("{reason} {when}"))
        }
    }
}
