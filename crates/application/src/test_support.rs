use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{JobCommand, JobState};
use tokio::sync::Mutex;

use crate::run_ports::{JobExit, JobHandle, JobLauncher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeJobBehavior {
    Exit(i32),
    RunUntilKilled,
    KillRefused,
    LaunchFails,
}

pub(crate) struct FakeJobLauncher {
    behavior: FakeJobBehavior,
    launches: AtomicUsize,
    transitions: Arc<Mutex<Vec<JobState>>>,
}

impl FakeJobLauncher {
    pub(crate) fn new(behavior: FakeJobBehavior) -> Self {
        Self {
            behavior,
            launches: AtomicUsize::new(0),
            transitions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub(crate) async fn transitions(&self) -> Vec<JobState> {
        self.transitions.lock().await.clone()
    }
}

#[async_trait]
impl JobLauncher for FakeJobLauncher {
    async fn launch(&self, _command: &JobCommand) -> AppResult<Box<dyn JobHandle>> {
        if self.behavior == FakeJobBehavior::LaunchFails {
            return Err(AppError::JobLaunch(
                "No such file or directory (os error 2)".to_owned(),
            ));
        }

        self.launches.fetch_add(1, Ordering::SeqCst);
        self.transitions.lock().await.push(JobState::Running);

        Ok(Box::new(FakeJobHandle {
            behavior: self.behavior,
            state: JobState::Running,
            transitions: self.transitions.clone(),
        }))
    }
}

struct FakeJobHandle {
    behavior: FakeJobBehavior,
    state: JobState,
    transitions: Arc<Mutex<Vec<JobState>>>,
}

impl FakeJobHandle {
    async fn transition(&mut self, state: JobState) {
        self.state = state;
        self.transitions.lock().await.push(state);
    }
}

#[async_trait]
impl JobHandle for FakeJobHandle {
    fn state(&self) -> JobState {
        self.state
    }

    async fn wait(&mut self) -> AppResult<JobExit> {
        match self.behavior {
            FakeJobBehavior::Exit(code) => {
                self.transition(JobState::Completed).await;
                Ok(JobExit {
                    status_code: Some(code),
                    success: code == 0,
                    output: b"Repair completed successfully\n".to_vec(),
                })
            }
            FakeJobBehavior::RunUntilKilled
            | FakeJobBehavior::KillRefused
            | FakeJobBehavior::LaunchFails => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> AppResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        if self.behavior == FakeJobBehavior::KillRefused {
            return Err(AppError::Internal(
                "Operation not permitted (os error 1)".to_owned(),
            ));
        }

        self.transition(JobState::Killed).await;
        Ok(())
    }
}
