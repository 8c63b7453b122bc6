use std::fmt::{Display, Formatter};

use repairlock_core::{AppError, AppResult, NonEmptyString};

/// Maximum keyspace name length accepted by Cassandra.
pub const KEYSPACE_MAX_LENGTH: usize = 48;

/// Validated Cassandra keyspace name.
///
/// The name ends up both in a metrics label and in the report file name, so
/// only `[A-Za-z0-9_]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyspace(NonEmptyString);

impl Keyspace {
    /// Creates a validated keyspace name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = NonEmptyString::new(value).map_err(|_| {
            AppError::Validation("keyspace must not be empty".to_owned())
        })?;

        if value.as_str().len() > KEYSPACE_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "keyspace '{}' exceeds {KEYSPACE_MAX_LENGTH} characters",
                value.as_str()
            )));
        }

        if !value
            .as_str()
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_')
        {
            return Err(AppError::Validation(format!(
                "keyspace '{}' must contain only ASCII letters, digits and underscores",
                value.as_str()
            )));
        }

        Ok(Self(value))
    }

    /// Returns the keyspace name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Keyspace {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
