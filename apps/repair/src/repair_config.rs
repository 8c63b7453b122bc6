use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use repairlock_application::LockSettings;
use repairlock_core::{AppError, AppResult};
use repairlock_domain::{
    DEFAULT_METRIC_PREFIX, JobCommand, Keyspace, LockKey, Placement, RepairMode,
};

/// Command-line flags; every flag also reads an environment variable.
#[derive(Debug, Parser)]
#[command(
    name = "repairlock",
    about = "Runs nodetool repair on one node of the fleet at a time"
)]
pub struct Args {
    /// Keyspace to repair.
    #[arg(long, env = "REPAIRLOCK_KEYSPACE")]
    pub keyspace: String,

    /// Prometheus node exporter textfile directory.
    #[arg(long, env = "REPAIRLOCK_TEXTFILE_DIR")]
    pub textfiledir: PathBuf,

    /// Lease key prefix. Required unless `--no-lock` is set.
    #[arg(long, env = "REPAIRLOCK_LOCK_PREFIX")]
    pub lockprefix: Option<String>,

    /// Lease name appended to the prefix.
    #[arg(long, env = "REPAIRLOCK_LOCK_NAME")]
    pub lockname: Option<String>,

    /// Datacenter the session and lease are placed in.
    #[arg(long, env = "REPAIRLOCK_LOCK_DC")]
    pub lockdc: Option<String>,

    /// Run without the fleet-wide lease.
    #[arg(long, env = "REPAIRLOCK_NO_LOCK")]
    pub no_lock: bool,

    /// Repair strategy: `sequential` or `partitioner-range-parallel`.
    #[arg(
        long,
        env = "REPAIRLOCK_REPAIR_MODE",
        default_value = "partitioner-range-parallel",
        value_parser = parse_repair_mode
    )]
    pub repair_mode: RepairMode,

    /// Coordination service (Redis) URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Namespace for session and lease keys in Redis.
    #[arg(long, env = "REPAIRLOCK_REDIS_KEY_PREFIX", default_value = "repairlock")]
    pub redis_key_prefix: String,

    /// Session time-to-live in seconds.
    #[arg(long, env = "REPAIRLOCK_SESSION_TTL_SECONDS", default_value_t = 300)]
    pub session_ttl_seconds: u64,

    /// Wait between lease acquisition attempts in milliseconds.
    #[arg(long, env = "REPAIRLOCK_ACQUIRE_RETRY_MS", default_value_t = 1000)]
    pub acquire_retry_ms: u64,

    /// Lease holder identity. Defaults to the system hostname.
    #[arg(long, env = "REPAIRLOCK_HOLDER_ID")]
    pub holder_id: Option<String>,

    /// Path to the nodetool executable.
    #[arg(long, env = "REPAIRLOCK_NODETOOL", default_value = "nodetool")]
    pub nodetool: String,

    /// Metric name prefix and report file name prefix.
    #[arg(long, env = "REPAIRLOCK_METRIC_PREFIX", default_value = DEFAULT_METRIC_PREFIX)]
    pub metric_prefix: String,
}

fn parse_repair_mode(value: &str) -> Result<RepairMode, AppError> {
    value.parse()
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub lock_key: LockKey,
    pub settings: LockSettings,
    pub redis_client: redis::Client,
    pub redis_key_prefix: String,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RepairConfig {
    pub keyspace: Keyspace,
    pub textfile_dir: PathBuf,
    pub metric_prefix: String,
    pub job_command: JobCommand,
    pub lock: Option<LockConfig>,
}

impl RepairConfig {
    pub fn load(args: &Args) -> AppResult<Self> {
        let keyspace = Keyspace::new(args.keyspace.as_str())?;

        if args.textfiledir.as_os_str().is_empty() {
            return Err(AppError::Validation("--textfiledir is required".to_owned()));
        }

        if args.metric_prefix.trim().is_empty() {
            return Err(AppError::Validation(
                "--metric-prefix must not be empty".to_owned(),
            ));
        }

        let job_command =
            JobCommand::nodetool_repair(args.nodetool.as_str(), &keyspace, args.repair_mode)?;

        let lock = if args.no_lock {
            None
        } else {
            Some(load_lock_config(args)?)
        };

        Ok(Self {
            keyspace,
            textfile_dir: args.textfiledir.clone(),
            metric_prefix: args.metric_prefix.trim().to_owned(),
            job_command,
            lock,
        })
    }
}

/// Returns the system hostname, falling back to a per-process identity.
fn default_holder_id() -> String {
    system_hostname()
        .or_else(|| env::var("HOSTNAME").ok())
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| format!("repairlock-{}", std::process::id()))
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|hostname| hostname.into_string().ok())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

fn load_lock_config(args: &Args) -> AppResult<LockConfig> {
    let lockprefix = args
        .lockprefix
        .as_deref()
        .ok_or_else(|| AppError::Validation("--lockprefix is required".to_owned()))?;
    let lock_key = LockKey::new(lockprefix, args.lockname.as_deref())?;

    if args.acquire_retry_ms == 0 {
        return Err(AppError::Validation(
            "--acquire-retry-ms must be greater than zero".to_owned(),
        ));
    }

    let holder_id = args
        .holder_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(default_holder_id, str::to_owned);

    let settings = LockSettings::new(
        holder_id,
        Duration::from_secs(args.session_ttl_seconds),
        Placement::from_datacenter(args.lockdc.as_deref()),
    )?;

    let redis_client = redis::Client::open(args.redis_url.as_str()).map_err(|error| {
        AppError::Validation(format!("invalid --redis-url '{}': {error}", args.redis_url))
    })?;

    Ok(LockConfig {
        lock_key,
        settings,
        redis_client,
        redis_key_prefix: args.redis_key_prefix.clone(),
        retry_interval: Duration::from_millis(args.acquire_retry_ms),
    })
}
