//! Prometheus node-exporter textfile writer for run records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use repairlock_application::RunReportSink;
use repairlock_core::{AppError, AppResult};
use repairlock_domain::RunRecord;
use tracing::info;

/// Writes `<directory>/<prefix>_<keyspace>.prom` atomically.
#[derive(Debug, Clone)]
pub struct TextfileRunReportSink {
    directory: PathBuf,
    metric_prefix: String,
}

impl TextfileRunReportSink {
    /// Creates one sink adapter.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, metric_prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            metric_prefix: metric_prefix.into(),
        }
    }

    /// Returns the file a record is written to.
    #[must_use]
    pub fn path_for(&self, record: &RunRecord) -> PathBuf {
        self.directory
            .join(record.file_name(self.metric_prefix.as_str()))
    }
}

#[async_trait]
impl RunReportSink for TextfileRunReportSink {
    async fn write_report(&self, record: &RunRecord) -> AppResult<()> {
        let path = self.path_for(record);
        let staging = staging_path(&path);
        let contents = record.render_textfile(self.metric_prefix.as_str());

        tokio::fs::write(&staging, contents.as_bytes())
            .await
            .map_err(|error| {
                AppError::ReportWrite(format!(
                    "failed to write metrics file {}: {error}",
                    staging.display()
                ))
            })?;

        if let Err(error) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(AppError::ReportWrite(format!(
                "failed to move metrics file into {}: {error}",
                path.display()
            )));
        }

        info!(path = %path.display(), success = record.success, "run record written");
        Ok(())
    }
}

// The textfile collector only reads `*.prom`, so the staging file is invisible to it.
fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}
