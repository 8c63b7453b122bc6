mod job;
mod lease;
mod report;
mod revocation;

pub use job::{JobExit, JobHandle, JobLauncher};
pub use lease::{AcquiredLease, CoordinationSession, LeaseCoordinator, LeaseHandle, SessionRequest};
pub use report::RunReportSink;
pub use revocation::{RevocationNotifier, RevocationReason, RevocationSignal, revocation_channel};
