use async_trait::async_trait;
use repairlock_core::AppResult;
use repairlock_domain::RunRecord;

/// Port persisting the run record for monitoring.
#[async_trait]
pub trait RunReportSink: Send + Sync {
    /// Persists the record; fails with `AppError::ReportWrite`.
    async fn write_report(&self, record: &RunRecord) -> AppResult<()>;
}
