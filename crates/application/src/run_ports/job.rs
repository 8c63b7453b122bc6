use async_trait::async_trait;
use repairlock_core::AppResult;
use repairlock_domain::{JobCommand, JobState};

/// Natural termination of a job process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobExit {
    /// Exit code; `None` when terminated by a signal.
    pub status_code: Option<i32>,
    /// Whether the exit status reports success.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: Vec<u8>,
}

/// Port starting external job processes.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Starts the command; fails with `AppError::JobLaunch` on spawn errors.
    async fn launch(&self, command: &JobCommand) -> AppResult<Box<dyn JobHandle>>;
}

/// Running external job process.
#[async_trait]
pub trait JobHandle: Send {
    /// Returns the current lifecycle state.
    fn state(&self) -> JobState;

    /// Waits for the process to exit on its own.
    ///
    /// Must be cancel-safe: dropping the future leaves the process running
    /// and the handle usable for `kill`.
    async fn wait(&mut self) -> AppResult<JobExit>;

    /// Forcibly terminates the process and waits for it to be reaped.
    ///
    /// A no-op on a handle that already reached a terminal state.
    async fn kill(&mut self) -> AppResult<()>;
}
