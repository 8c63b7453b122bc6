//! Runs `nodetool repair` under a fleet-wide exclusive lease and reports the
//! outcome to the node exporter textfile collector.

mod repair_config;

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use repairlock_application::{
    LockCoordinator, ProcessSupervisor, RepairRunService, RepairRunSettings, RevocationReason,
    RevocationSignal, RunReportSink, revocation_channel,
};
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{Keyspace, RunMetrics};
use repairlock_infrastructure::{
    RedisLeaseCoordinator, TextfileRunReportSink, TokioProcessJobLauncher,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::repair_config::{Args, RepairConfig};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = match RepairConfig::load(&args) {
        Ok(config) => config,
        Err(config_error) => {
            error!(error = %config_error, "invalid configuration");
            if let Err(write_error) = report_config_failure(&args).await {
                error!(error = %write_error, "failed to write run record");
            }
            return exit_code_for(&config_error);
        }
    };

    let report_sink = Arc::new(TextfileRunReportSink::new(
        config.textfile_dir.clone(),
        config.metric_prefix.clone(),
    ));
    let supervisor = ProcessSupervisor::new(Arc::new(TokioProcessJobLauncher::new()));
    let mut service = RepairRunService::new(
        supervisor,
        report_sink,
        RepairRunSettings {
            keyspace: config.keyspace.clone(),
            job_command: config.job_command.clone(),
        },
    );

    match config.lock {
        Some(lock) => {
            info!(
                lock_key = %lock.lock_key,
                holder_id = %lock.settings.holder_id,
                "fleet-wide locking enabled"
            );
            let coordinator = RedisLeaseCoordinator::new(lock.redis_client, lock.redis_key_prefix)
                .with_retry_interval(lock.retry_interval);
            service = service.with_lock(
                LockCoordinator::new(Arc::new(coordinator), lock.settings),
                lock.lock_key,
            );
        }
        None => warn!("fleet-wide locking disabled; repair runs unguarded"),
    }

    match service.run(shutdown_signal()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(run_error) => {
            error!(keyspace = %config.keyspace, error = %run_error, "repair run failed");
            exit_code_for(&run_error)
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn exit_code_for(app_error: &AppError) -> ExitCode {
    ExitCode::from(app_error.exit_code())
}

/// Writes a failed record when the flags still name a usable keyspace and
/// report directory. Returns whether a record was written.
async fn report_config_failure(args: &Args) -> AppResult<bool> {
    let Ok(keyspace) = Keyspace::new(args.keyspace.as_str()) else {
        return Ok(false);
    };
    if args.textfiledir.as_os_str().is_empty() || args.metric_prefix.trim().is_empty() {
        return Ok(false);
    }

    let now = Utc::now();
    let record = RunMetrics::start(keyspace, now).finalize(now, false);
    TextfileRunReportSink::new(args.textfiledir.clone(), args.metric_prefix.trim())
        .write_report(&record)
        .await?;
    Ok(true)
}

/// Fires `OperatorShutdown` on SIGINT or SIGTERM.
fn shutdown_signal() -> RevocationSignal {
    let (notifier, signal) = revocation_channel();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(signal_error) = tokio::signal::ctrl_c().await {
                warn!(error = %signal_error, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(signal_error) => {
                    warn!(error = %signal_error, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }

        info!("shutdown requested; stopping repair");
        notifier.fire(RevocationReason::OperatorShutdown);
    });

    signal
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use repairlock_core::AppError;

    use super::report_config_failure;
    use crate::repair_config::Args;

    fn args(keyspace: &str, textfiledir: &std::path::Path) -> Args {
        let textfiledir = textfiledir.display().to_string();
        Args::try_parse_from([
            "repairlock",
            "--keyspace",
            keyspace,
            "--textfiledir",
            textfiledir.as_str(),
        ])
        .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn configuration_failure_writes_failed_record() {
        let directory = std::env::temp_dir()
            .join(format!("repairlock-config-failure-{}", std::process::id()));
        std::fs::create_dir_all(&directory).unwrap_or_else(|_| unreachable!());

        let written = report_config_failure(&args("events", &directory)).await;

        assert!(matches!(written, Ok(true)));
        let contents =
            std::fs::read_to_string(directory.join("cassandra_repair_events.prom")).unwrap_or_default();
        assert!(contents.starts_with("cassandra_repair_success{keyspace=\"events\"} 0\n"));
        let _ = std::fs::remove_dir_all(&directory);
    }

    #[tokio::test]
    async fn unwritable_directory_surfaces_report_failure() {
        let directory = std::env::temp_dir()
            .join(format!("repairlock-config-missing-{}", std::process::id()))
            .join("absent");

        let written = report_config_failure(&args("events", &directory)).await;

        assert!(matches!(written, Err(AppError::ReportWrite(_))));
    }

    #[tokio::test]
    async fn unusable_keyspace_skips_the_record() {
        let directory = std::env::temp_dir();

        let written = report_config_failure(&args("bad keyspace", &directory)).await;

        assert!(matches!(written, Ok(false)));
    }
}
