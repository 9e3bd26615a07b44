//! Run statistics and the final summary.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Counters for one pipeline run.
#[derive(Debug)]
pub struct Metrics {
    /// Units transformed in this run
    pub units_succeeded: AtomicU64,

    /// Units satisfied by an existing artifact (idempotence short-circuit)
    pub units_reused: AtomicU64,

    /// Units that exhausted retries or failed permanently
    pub units_failed: AtomicU64,

    /// Turns rejected by payload validation
    pub units_invalid: AtomicU64,

    /// Dialogue groups accepted within the budget
    pub groups_enumerated: AtomicU64,

    /// Shards fully resolved and checkpointed
    pub shards_completed: AtomicU64,

    /// Shards skipped because their document failed to decode
    pub shards_decode_failed: AtomicU64,

    /// Shards left incomplete (budget cut or interrupt)
    pub shards_deferred: AtomicU64,

    /// Per-unit failure reasons for the summary
    failures: Mutex<Vec<FailureRecord>>,

    start_time: Instant,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            units_succeeded: AtomicU64::new(0),
            units_reused: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            units_invalid: AtomicU64::new(0),
            groups_enumerated: AtomicU64::new(0),
            shards_completed: AtomicU64::new(0),
            shards_decode_failed: AtomicU64::new(0),
            shards_deferred: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        })
    }

    /// Record a transformed unit.
    pub fn add_unit_succeeded(&self) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit satisfied by an existing artifact.
    pub fn add_unit_reused(&self) {
        self.units_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed unit with its reason.
    pub fn add_unit_failed(&self, shard_id: &str, unit: &str, reason: &str) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(FailureRecord {
                shard_id: shard_id.to_string(),
                unit: unit.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    /// Record validation-rejected turns.
    pub fn add_units_invalid(&self, count: u64) {
        self.units_invalid.fetch_add(count, Ordering::Relaxed);
    }

    /// Record accepted groups.
    pub fn add_groups(&self, count: u64) {
        self.groups_enumerated.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a checkpointed shard.
    pub fn add_shard_completed(&self) {
        self.shards_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a shard whose document failed to decode.
    pub fn add_shard_decode_failed(&self) {
        self.shards_decode_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a shard left for a later run.
    pub fn add_shard_deferred(&self) {
        self.shards_deferred.fetch_add(1, Ordering::Relaxed);
    }

    /// Elapsed time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Snapshot into a run summary.
    pub fn summary(&self, interrupted: bool) -> RunSummary {
        let failures = self
            .failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();

        RunSummary {
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_reused: self.units_reused.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_invalid: self.units_invalid.load(Ordering::Relaxed),
            groups_enumerated: self.groups_enumerated.load(Ordering::Relaxed),
            shards_completed: self.shards_completed.load(Ordering::Relaxed),
            shards_decode_failed: self.shards_decode_failed.load(Ordering::Relaxed),
            shards_deferred: self.shards_deferred.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed().as_secs_f64(),
            interrupted,
            failures,
        }
    }
}

/// One unit-level failure, kept for the summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    /// Shard the unit came from
    pub shard_id: String,

    /// The unit's composed content id
    pub unit: String,

    /// Why it failed
    pub reason: String,
}

/// Final statistics for a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub units_succeeded: u64,
    pub units_reused: u64,
    pub units_failed: u64,
    pub units_invalid: u64,
    pub groups_enumerated: u64,
    pub shards_completed: u64,
    pub shards_decode_failed: u64,
    pub shards_deferred: u64,
    pub elapsed_secs: f64,
    /// True when an interrupt stopped intake before enumeration finished
    pub interrupted: bool,
    /// Unit-level failures with reasons
    pub failures: Vec<FailureRecord>,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Groups: {} | Units: {} transformed, {} reused, {} failed, {} invalid | \
             Shards: {} completed, {} undecodable, {} deferred | Elapsed: {:.1}s{}",
            self.groups_enumerated,
            self.units_succeeded,
            self.units_reused,
            self.units_failed,
            self.units_invalid,
            self.shards_completed,
            self.shards_decode_failed,
            self.shards_deferred,
            self.elapsed_secs,
            if self.interrupted {
                " (interrupted)"
            } else {
                ""
            }
        )
    }
}

impl RunSummary {
    /// Log failure reasons, grouped per shard.
    pub fn log_failures(&self) {
        for failure in &self.failures {
            tracing::warn!(
                "Unit '{}' in shard '{}' failed: {}",
                failure.unit,
                failure.shard_id,
                failure.reason
            );
        }
    }
}
