//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod keyspace;
mod lock;
mod repair;
mod run_record;

pub use keyspace::{KEYSPACE_MAX_LENGTH, Keyspace};
pub use lock::{LockKey, Placement};
pub use repair::{JobCommand, JobState, RepairMode};
pub use run_record::{DEFAULT_METRIC_PREFIX, RunMetrics, RunRecord};
