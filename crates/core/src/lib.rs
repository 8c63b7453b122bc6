//! Shared primitives for all Rust crates in repairlock.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used across repairlock crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Run failure categories.
///
/// Every variant is fatal to the run. Non-fatal conditions (a failed
/// voluntary release, a failed kill after revocation) are logged by the
/// caller and never surface as an `AppError`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Coordination service unreachable or session creation rejected.
    #[error("coordination unavailable: {0}")]
    CoordinationUnavailable(String),

    /// Session exists but the lease was never obtained.
    #[error("lock acquisition failed: {0}")]
    LockAcquisition(String),

    /// Job process could not be started.
    #[error("job launch failed: {0}")]
    JobLaunch(String),

    /// Job ran and exited unsuccessfully.
    #[error("job execution failed: {0}")]
    JobExecution(String),

    /// Job was killed because exclusivity was lost.
    #[error("lease revoked during run: {0}")]
    LeaseRevoked(String),

    /// Run was cancelled by the operator.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Run record could not be persisted.
    #[error("report write failed: {0}")]
    ReportWrite(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the process exit code reported for this failure category.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Internal(_) => 1,
            Self::Validation(_) => 2,
            Self::CoordinationUnavailable(_) => 3,
            Self::LockAcquisition(_) => 4,
            Self::JobLaunch(_) => 5,
            Self::JobExecution(_) => 6,
            Self::LeaseRevoked(_) => 7,
            Self::ReportWrite(_) => 8,
            Self::Interrupted(_) => 9,
        }
    }
}
