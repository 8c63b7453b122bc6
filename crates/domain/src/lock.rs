use std::fmt::{Display, Formatter};

use repairlock_core::{AppError, AppResult, NonEmptyString};

/// Fleet-wide key naming the exclusive lease.
///
/// `prefix` alone is the key when no lock name is set; otherwise the key is
/// `prefix/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Builds the key from a prefix and an optional lock name.
    pub fn new(prefix: &str, name: Option<&str>) -> AppResult<Self> {
        let prefix = NonEmptyString::new(prefix.trim().trim_end_matches('/'))
            .map_err(|_| AppError::Validation("lock prefix must not be empty".to_owned()))?;

        let key = match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => format!("{}/{}", prefix.as_str(), name.trim_start_matches('/')),
            None => prefix.into(),
        };

        Ok(Self(key))
    }

    /// Returns the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for LockKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Optional coordination-service placement (datacenter) for the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placement(NonEmptyString);

impl Placement {
    /// Creates a placement from an optional datacenter name; blank means none.
    pub fn from_datacenter(datacenter: Option<&str>) -> Option<Self> {
        datacenter
            .and_then(|value| NonEmptyString::new(value.trim()).ok())
            .map(Self)
    }

    /// Returns the datacenter name.
    #[must_use]
    pub fn datacenter(&self) -> &str {
        self.0.as_str()
    }
}
