use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::Keyspace;

/// Default metric name prefix for the textfile collector.
pub const DEFAULT_METRIC_PREFIX: &str = "cassandra_repair";

/// Mutable accumulator for phase timestamps of one run.
///
/// Populated by the run controller as phases complete and consumed exactly
/// once by [`RunMetrics::finalize`]. Phases that never started stay `None`
/// and report a zero duration, including the lock phase of an unlocked run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetrics {
    keyspace: Keyspace,
    started_at: DateTime<Utc>,
    lock_started_at: Option<DateTime<Utc>>,
    lock_finished_at: Option<DateTime<Utc>>,
    repair_started_at: Option<DateTime<Utc>>,
    repair_finished_at: Option<DateTime<Utc>>,
}

impl RunMetrics {
    /// Starts a run record at the given instant.
    #[must_use]
    pub fn start(keyspace: Keyspace, started_at: DateTime<Utc>) -> Self {
        Self {
            keyspace,
            started_at,
            lock_started_at: None,
            lock_finished_at: None,
            repair_started_at: None,
            repair_finished_at: None,
        }
    }

    /// Marks the start of lock acquisition.
    pub fn mark_lock_started(&mut self, at: DateTime<Utc>) {
        self.lock_started_at = Some(at);
    }

    /// Marks the lease as acquired.
    pub fn mark_lock_finished(&mut self, at: DateTime<Utc>) {
        self.lock_finished_at = Some(at);
    }

    /// Marks the job start.
    pub fn mark_repair_started(&mut self, at: DateTime<Utc>) {
        self.repair_started_at = Some(at);
    }

    /// Marks the job end, whichever way it ended.
    pub fn mark_repair_finished(&mut self, at: DateTime<Utc>) {
        self.repair_finished_at = Some(at);
    }

    /// Returns the keyspace this run targets.
    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Closes the run and computes durations.
    #[must_use]
    pub fn finalize(self, finished_at: DateTime<Utc>, success: bool) -> RunRecord {
        RunRecord {
            keyspace: self.keyspace,
            success,
            lock_duration_ms: span_millis(self.lock_started_at, self.lock_finished_at),
            repair_duration_ms: span_millis(self.repair_started_at, self.repair_finished_at),
            total_duration_ms: span_millis(Some(self.started_at), Some(finished_at)),
        }
    }
}

fn span_millis(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    match (start, end) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0),
        _ => 0,
    }
}

/// Immutable summary of one finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    /// Keyspace label value.
    pub keyspace: Keyspace,
    /// Whether the whole run succeeded.
    pub success: bool,
    /// Lock wait in milliseconds; zero when locking is disabled.
    pub lock_duration_ms: i64,
    /// Job runtime in milliseconds.
    pub repair_duration_ms: i64,
    /// Whole run in milliseconds.
    pub total_duration_ms: i64,
}

impl RunRecord {
    /// Returns the report file name, `<prefix>_<keyspace>.prom`.
    #[must_use]
    pub fn file_name(&self, metric_prefix: &str) -> String {
        format!("{metric_prefix}_{}.prom", self.keyspace)
    }

    /// Renders gauge lines in node-exporter textfile format.
    ///
    /// Output is deterministic for equal records and ends with a newline.
    #[must_use]
    pub fn render_textfile(&self, metric_prefix: &str) -> String {
        let gauges = [
            ("success", i64::from(self.success)),
            ("duration_lock_milliseconds", self.lock_duration_ms),
            ("duration_repair_milliseconds", self.repair_duration_ms),
            ("duration_total_milliseconds", self.total_duration_ms),
        ];

        let mut rendered = String::new();
        for (name, value) in gauges {
            let _ = writeln!(
                rendered,
                "{metric_prefix}_{name}{{keyspace=\"{}\"}} {value}",
                self.keyspace
            );
        }
        rendered
    }
}
