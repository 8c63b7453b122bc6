//! Child-process job launcher built on `tokio::process`.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use repairlock_application::{JobExit, JobHandle, JobLauncher};
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{JobCommand, JobState};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CAPTURE_CHUNK_BYTES: usize = 8 * 1024;

/// Launches jobs as child processes with stdout and stderr captured together.
///
/// On unix each job leads its own process group so a kill also reaches the
/// processes it spawned (`nodetool` is a shell wrapper around a JVM).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessJobLauncher;

impl TokioProcessJobLauncher {
    /// Creates a launcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobLauncher for TokioProcessJobLauncher {
    async fn launch(&self, command: &JobCommand) -> AppResult<Box<dyn JobHandle>> {
        let mut process = Command::new(command.program());
        process
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        process.process_group(0);

        let mut child = process.spawn().map_err(|error| {
            AppError::JobLaunch(format!("failed to start '{}': {error}", command.program()))
        })?;

        let output = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(stdout, output.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(stderr, output.clone())));
        }

        let process_group = child.id();
        debug!(pid = ?process_group, command = %command, "job process spawned");

        Ok(Box::new(ProcessJobHandle {
            child,
            process_group,
            output,
            readers,
            exit_status: None,
            state: JobState::Running,
        }))
    }
}

async fn capture<R>(mut reader: R, output: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut chunk = vec![0_u8; CAPTURE_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => output.lock().await.extend_from_slice(&chunk[..read]),
            Err(error) => {
                debug!(error = %error, "job output stream closed");
                break;
            }
        }
    }
}

/// Handle over one spawned job.
///
/// The job stays `Running` until the leader has exited and both output
/// streams are closed, since processes left in the group keep the pipes open.
struct ProcessJobHandle {
    child: Child,
    #[cfg_attr(not(unix), allow(dead_code))]
    process_group: Option<u32>,
    output: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
    exit_status: Option<ExitStatus>,
    state: JobState,
}

impl ProcessJobHandle {
    fn stop_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

#[async_trait]
impl JobHandle for ProcessJobHandle {
    fn state(&self) -> JobState {
        self.state
    }

    async fn wait(&mut self) -> AppResult<JobExit> {
        if self.state == JobState::Killed {
            return Err(AppError::Internal("job process was killed".to_owned()));
        }

        let status = match self.exit_status {
            Some(status) => status,
            None => {
                let status = self.child.wait().await.map_err(|error| {
                    AppError::Internal(format!("failed to wait for job process: {error}"))
                })?;
                self.exit_status = Some(status);
                status
            }
        };

        while let Some(reader) = self.readers.last_mut() {
            if let Err(error) = reader.await {
                debug!(error = %error, "job output reader ended abnormally");
            }
            self.readers.pop();
        }

        self.state = JobState::Completed;
        let output = std::mem::take(&mut *self.output.lock().await);
        Ok(JobExit {
            status_code: status.code(),
            success: status.success(),
            output,
        })
    }

    async fn kill(&mut self) -> AppResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        // The leader may be gone while the rest of its group still runs.
        #[cfg(unix)]
        if let Some(process_group) = self.process_group
            && let Err(error) = kill_process_group(process_group)
        {
            warn!(process_group, error = %error, "failed to signal job process group");
        }

        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.exit_status = Some(status),
                _ => self.child.kill().await.map_err(|error| {
                    AppError::Internal(format!("failed to kill job process: {error}"))
                })?,
            }
        }

        self.stop_readers();
        self.output.lock().await.clear();
        self.state = JobState::Killed;
        Ok(())
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> AppResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| AppError::Internal(format!("process id {pid} out of range")))?;

    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(error) => Err(AppError::Internal(format!("killpg failed: {error}"))),
    }
}
