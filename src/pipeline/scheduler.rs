//! Batch scheduling and single-writer progress bookkeeping.
//!
//! The scheduler drains the enumerator shard by shard, accumulates units into
//! bounded batches, and fans each batch out over a bounded number of
//! concurrent executions. Workers only transform and write artifacts; every
//! mutation of shard bookkeeping, the checkpoint, and the summary happens on
//! the scheduler task as results arrive.
//!
//! A shard is committed to the checkpoint only once every one of its
//! enumerated units is terminal and enumeration saw the whole shard; a shard
//! cut short by the group budget is rewritten (so partial output is visible)
//! but never checkpointed.

use crate::config::RewriteMode;
use crate::corpus::{EnumeratedShard, ShardWork, WorkUnit};
use crate::io::{ArtifactStore, CheckpointStore};
use crate::pipeline::executor::{ExecutedUnit, UnitExecutor, UnitStatus};
use crate::pipeline::{Metrics, RunSummary};
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Units accumulated per batch
    pub batch_size: usize,

    /// Concurrent unit executions within a batch
    pub concurrency: usize,

    /// Checkpoint commit cadence in completed units
    pub save_interval: usize,

    /// Shard rewrite behavior
    pub rewrite: RewriteMode,

    /// Field name for `RewriteMode::Annotate`
    pub annotate_field: String,
}

/// Bookkeeping for one shard whose units are in flight.
#[derive(Debug)]
struct ShardState {
    path: PathBuf,
    pending: usize,
    truncated: bool,
    /// Transformed text per (dialogue_id, turn_index), for rewriting
    substitutions: HashMap<(String, usize), String>,
}

/// Drives batches of unit executions and owns all progress bookkeeping.
pub struct Scheduler {
    executor: Arc<UnitExecutor>,
    store: Arc<ArtifactStore>,
    checkpoint: CheckpointStore,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,

    states: HashMap<String, ShardState>,
    completions_since_commit: usize,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(
        executor: Arc<UnitExecutor>,
        store: Arc<ArtifactStore>,
        checkpoint: CheckpointStore,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            executor,
            store,
            checkpoint,
            metrics,
            config,
            shutdown,
            states: HashMap::new(),
            completions_since_commit: 0,
        }
    }

    /// Process all enumerated shards and return the run summary.
    ///
    /// Honors the shutdown flag between batches: in-flight units finish, the
    /// checkpoint reflects every fully-resolved shard, and no new batch is
    /// started afterwards.
    pub async fn run(
        mut self,
        shards: impl Iterator<Item = EnumeratedShard>,
    ) -> Result<RunSummary> {
        let mut queue: Vec<WorkUnit> = Vec::new();
        let mut interrupted = false;

        'intake: for outcome in shards {
            if self.shutdown.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }

            match outcome {
                EnumeratedShard::DecodeFailed { shard_id, error } => {
                    tracing::error!("Skipping undecodable shard '{}': {}", shard_id, error);
                    self.metrics.add_shard_decode_failed();
                }
                EnumeratedShard::Work(work) => {
                    self.admit_shard(work, &mut queue)?;
                }
            }

            while queue.len() >= self.config.batch_size {
                let batch: Vec<WorkUnit> = queue.drain(..self.config.batch_size).collect();
                self.process_batch(batch).await?;

                if self.shutdown.load(Ordering::SeqCst) {
                    interrupted = true;
                    break 'intake;
                }
            }
        }

        // Drain the remainder unless interrupted.
        while !interrupted && !queue.is_empty() {
            let take = queue.len().min(self.config.batch_size);
            let batch: Vec<WorkUnit> = queue.drain(..take).collect();
            self.process_batch(batch).await?;

            if self.shutdown.load(Ordering::SeqCst) && !queue.is_empty() {
                interrupted = true;
            }
        }

        if interrupted {
            tracing::info!("Interrupted: leaving {} unit(s) for a later run", queue.len());
        }

        // Shards still tracked here never fully resolved in this run
        // (interrupted, or resolved-but-truncated handled below).
        for (shard_id, state) in &self.states {
            tracing::info!(
                "Shard '{}' left incomplete ({} unit(s) unresolved)",
                shard_id,
                state.pending
            );
            self.metrics.add_shard_deferred();
        }

        let summary = self.metrics.summary(interrupted);
        Ok(summary)
    }

    /// Register a shard's units and handle shards that resolve immediately.
    fn admit_shard(&mut self, work: ShardWork, queue: &mut Vec<WorkUnit>) -> Result<()> {
        self.metrics.add_groups(work.groups as u64);
        self.metrics.add_units_invalid(work.invalid_units as u64);

        let state = ShardState {
            path: work.path,
            pending: work.units.len(),
            truncated: work.truncated,
            substitutions: HashMap::new(),
        };

        if state.pending == 0 {
            // Nothing to execute: commit now if the whole shard was seen.
            if state.truncated {
                self.metrics.add_shard_deferred();
            } else {
                self.finalize_shard(&work.shard_id, state)?;
            }
            return Ok(());
        }

        self.states.insert(work.shard_id, state);
        queue.extend(work.units);
        Ok(())
    }

    /// Execute one batch with bounded concurrency, recording each result as
    /// it arrives and committing resolved shards at the configured cadence.
    async fn process_batch(&mut self, batch: Vec<WorkUnit>) -> Result<()> {
        tracing::debug!(
            "Processing batch of {} unit(s) ({} concurrent)",
            batch.len(),
            self.config.concurrency
        );

        let executor = self.executor.clone();
        let spawn = move |unit: WorkUnit| {
            let executor = executor.clone();
            async move { executor.execute(unit).await }
        };

        let mut inflight = FuturesUnordered::new();
        let mut units = batch.into_iter();

        for unit in units.by_ref().take(self.config.concurrency) {
            inflight.push(spawn(unit));
        }

        while let Some(executed) = inflight.next().await {
            if let Some(unit) = units.next() {
                inflight.push(spawn(unit));
            }

            self.record(executed);
            self.completions_since_commit += 1;
            if self.completions_since_commit >= self.config.save_interval {
                self.commit_resolved()?;
            }
        }

        self.commit_resolved()?;
        Ok(())
    }

    /// Fold one executed unit into shard bookkeeping and metrics.
    fn record(&mut self, executed: ExecutedUnit) {
        let unit = &executed.unit;
        let Some(state) = self.states.get_mut(&unit.shard_id) else {
            tracing::error!("Result for untracked shard '{}'", unit.shard_id);
            return;
        };
        state.pending = state.pending.saturating_sub(1);

        match executed.status {
            UnitStatus::Done { text } => {
                self.metrics.add_unit_succeeded();
                state
                    .substitutions
                    .insert((unit.group_id.clone(), unit.turn_index), text);
            }
            UnitStatus::Reused { text } => {
                self.metrics.add_unit_reused();
                state
                    .substitutions
                    .insert((unit.group_id.clone(), unit.turn_index), text);
            }
            UnitStatus::Failed { reason, .. } => {
                self.metrics.add_unit_failed(
                    &unit.shard_id,
                    executed.content_id.file_stem(),
                    &reason,
                );
            }
        }
    }

    /// Rewrite and checkpoint every shard whose units are all terminal.
    fn commit_resolved(&mut self) -> Result<()> {
        self.completions_since_commit = 0;

        let resolved: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| state.pending == 0)
            .map(|(shard_id, _)| shard_id.clone())
            .collect();

        for shard_id in resolved {
            let Some(state) = self.states.remove(&shard_id) else {
                continue;
            };

            if state.truncated {
                // Budget cut the shard short: make partial output visible
                // but never claim completion.
                self.rewrite(&shard_id, &state)?;
                self.metrics.add_shard_deferred();
                tracing::info!(
                    "Shard '{}' resolved partially (budget); not checkpointed",
                    shard_id
                );
            } else {
                self.finalize_shard(&shard_id, state)?;
            }
        }

        Ok(())
    }

    fn finalize_shard(&mut self, shard_id: &str, state: ShardState) -> Result<()> {
        self.rewrite(shard_id, &state)?;
        self.checkpoint.commit(shard_id)?;
        self.metrics.add_shard_completed();
        tracing::info!("Shard '{}' complete", shard_id);
        Ok(())
    }

    fn rewrite(&self, shard_id: &str, state: &ShardState) -> Result<()> {
        if self.config.rewrite == RewriteMode::None {
            return Ok(());
        }
        tracing::debug!(
            "Rewriting shard '{}' with {} substitution(s)",
            shard_id,
            state.substitutions.len()
        );
        self.store.rewrite_shard(
            &state.path,
            &state.substitutions,
            self.config.rewrite,
            &self.config.annotate_field,
        )
    }
}
