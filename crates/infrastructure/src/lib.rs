//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_lease_coordinator;
mod redis_lease_coordinator;
mod textfile_run_report_sink;
mod tokio_process_job_launcher;

pub use in_memory_lease_coordinator::InMemoryLeaseCoordinator;
pub use redis_lease_coordinator::{DEFAULT_ACQUIRE_RETRY_INTERVAL, RedisLeaseCoordinator};
pub use textfile_run_report_sink::TextfileRunReportSink;
pub use tokio_process_job_launcher::TokioProcessJobLauncher;
