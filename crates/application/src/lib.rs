//! Application services and ports.

#![forbid(unsafe_code)]

mod lock_coordinator;
mod process_supervisor;
mod repair_run_service;
mod run_ports;

#[cfg(test)]
mod test_support;

pub use lock_coordinator::{DEFAULT_SESSION_TTL, LockCoordinator, LockSettings};
pub use process_supervisor::{JobOutcome, ProcessSupervisor};
pub use repair_run_service::{RepairRunService, RepairRunSettings};
pub use run_ports::{
    AcquiredLease, CoordinationSession, JobExit, JobHandle, JobLauncher, LeaseCoordinator,
    LeaseHandle, RevocationNotifier, RevocationReason, RevocationSignal, RunReportSink,
    SessionRequest, revocation_channel,
};
