use std::fmt::{Display, Formatter};
use std::str::FromStr;

use repairlock_core::{AppError, AppResult, NonEmptyString};

use crate::Keyspace;

/// Repair strategy passed to `nodetool repair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RepairMode {
    /// One replica at a time.
    Sequential,
    /// Primary partitioner range only, all datacenters in parallel.
    #[default]
    PartitionerRangeParallel,
}

impl RepairMode {
    /// Returns stable mode value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::PartitionerRangeParallel => "partitioner-range-parallel",
        }
    }

    /// Returns the `nodetool repair` flags that follow `--full`.
    #[must_use]
    pub fn flags(self) -> &'static [&'static str] {
        match self {
            Self::Sequential => &["--sequential"],
            Self::PartitionerRangeParallel => &["--dc-parallel", "--partitioner-range"],
        }
    }
}

impl Display for RepairMode {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for RepairMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "sequential" => Ok(Self::Sequential),
            "partitioner-range-parallel" => Ok(Self::PartitionerRangeParallel),
            other => Err(AppError::Validation(format!(
                "unknown repair mode '{other}'"
            ))),
        }
    }
}

/// External process invocation: executable plus fixed argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    program: NonEmptyString,
    args: Vec<String>,
}

impl JobCommand {
    /// Creates a command for an arbitrary executable.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> AppResult<Self> {
        let program = NonEmptyString::new(program)
            .map_err(|_| AppError::Validation("job program must not be empty".to_owned()))?;

        Ok(Self { program, args })
    }

    /// Builds `<nodetool> repair <keyspace> --full <mode flags>`.
    pub fn nodetool_repair(nodetool: &str, keyspace: &Keyspace, mode: RepairMode) -> AppResult<Self> {
        let mut args = vec![
            "repair".to_owned(),
            keyspace.as_str().to_owned(),
            "--full".to_owned(),
        ];
        args.extend(mode.flags().iter().map(|flag| (*flag).to_owned()));

        Self::new(nodetool, args)
    }

    /// Returns the executable name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Returns the argument list.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.args.as_slice()
    }
}

impl Display for JobCommand {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.program.as_str())?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}

/// Job handle lifecycle state. `Completed` and `Killed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Handle exists, process not yet started.
    Created,
    /// Process is running.
    Running,
    /// Process exited on its own.
    Completed,
    /// Process was forcibly terminated.
    Killed,
}

impl JobState {
    /// Returns whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Killed)
    }
}
