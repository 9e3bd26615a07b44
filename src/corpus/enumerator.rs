//! Enumeration of work units from the input directory.
//!
//! Shards already recorded in the checkpoint are skipped before parsing.
//! Within a shard, dialogues are enumerated in document order and turns are
//! validated individually; the group budget is enforced at dialogue
//! granularity so a dialogue is never truncated mid-way.

use crate::config::{BudgetScope, InputConfig, ProcessingConfig};
use crate::corpus::shard::{shard_id_for, Shard};
use crate::corpus::WorkUnit;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Counter of fully-processed groups, capped at a configured maximum.
#[derive(Debug, Clone)]
pub struct GroupBudget {
    max_groups: Option<usize>,
    scope: BudgetScope,
    used: usize,
}

impl GroupBudget {
    /// Create a budget. `None` means unlimited.
    pub fn new(max_groups: Option<usize>, scope: BudgetScope) -> Self {
        Self {
            max_groups,
            scope,
            used: 0,
        }
    }

    /// Called at the start of each shard; per-shard budgets reset here.
    fn begin_shard(&mut self) {
        if self.scope == BudgetScope::PerShard {
            self.used = 0;
        }
    }

    /// Whether no further group may be started.
    pub fn exhausted(&self) -> bool {
        self.max_groups.is_some_and(|max| self.used >= max)
    }

    /// Whether enumeration of further shards is pointless.
    fn globally_exhausted(&self) -> bool {
        self.scope == BudgetScope::Global && self.exhausted()
    }

    fn count_group(&mut self) {
        self.used += 1;
    }

    /// Groups accepted so far (within the current scope window).
    pub fn used(&self) -> usize {
        self.used
    }
}

/// Enumerated contents of one shard.
#[derive(Debug, Clone)]
pub struct ShardWork {
    /// Shard identifier (file stem)
    pub shard_id: String,

    /// Path of the source document
    pub path: PathBuf,

    /// Valid units in enumeration order
    pub units: Vec<WorkUnit>,

    /// Groups accepted from this shard
    pub groups: usize,

    /// Turns rejected by payload validation
    pub invalid_units: usize,

    /// True when the budget halted enumeration before the end of the shard.
    /// Truncated shards must never be checkpointed as complete.
    pub truncated: bool,
}

/// Outcome of enumerating one shard document.
#[derive(Debug)]
pub enum EnumeratedShard {
    /// The shard parsed; its units (possibly none) are ready for scheduling.
    Work(ShardWork),

    /// The shard could not be decoded and is skipped for this run.
    DecodeFailed {
        shard_id: String,
        error: PipelineError,
    },
}

/// Scans the input directory and produces per-shard work.
#[derive(Debug, Clone)]
pub struct Enumerator {
    input_dir: PathBuf,
    max_payload_len: usize,
}

impl Enumerator {
    /// Create an enumerator for the configured input directory.
    pub fn new(input: &InputConfig) -> Self {
        Self {
            input_dir: input.input_dir.clone(),
            max_payload_len: input.max_payload_len,
        }
    }

    /// List shard documents in deterministic order, skipping completed ones.
    pub fn shard_paths(&self, completed_shards: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.input_dir)
            .with_context(|| format!("failed to read input dir {}", self.input_dir.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter(|path| {
                let shard_id = shard_id_for(path);
                if completed_shards.contains(&shard_id) {
                    tracing::debug!("Skipping completed shard '{}'", shard_id);
                    false
                } else {
                    true
                }
            })
            .collect();

        paths.sort();
        Ok(paths)
    }

    /// Enumerate one shard under the given budget.
    pub fn enumerate_shard(&self, path: &Path, budget: &mut GroupBudget) -> EnumeratedShard {
        budget.begin_shard();

        let shard = match Shard::load(path) {
            Ok(shard) => shard,
            Err(error) => {
                return EnumeratedShard::DecodeFailed {
                    shard_id: shard_id_for(path),
                    error,
                }
            }
        };

        let mut units = Vec::new();
        let mut sequence_index = 0usize;
        let mut groups = 0usize;
        let mut invalid_units = 0usize;
        let mut truncated = false;

        for dialogue in &shard.dialogues {
            if dialogue.dialogue_id.is_empty() {
                tracing::warn!(
                    "Dialogue without id in shard '{}', skipping {} turns",
                    shard.shard_id,
                    dialogue.turns.len()
                );
                sequence_index += dialogue.turns.len();
                continue;
            }

            if budget.exhausted() {
                truncated = true;
                break;
            }

            let mut group_units = Vec::new();
            for (turn_index, turn) in dialogue.turns.iter().enumerate() {
                let seq = sequence_index;
                sequence_index += 1;

                match validate_payload(&turn.utterance, self.max_payload_len) {
                    Ok(payload) => group_units.push(WorkUnit {
                        shard_id: shard.shard_id.clone(),
                        sequence_index: seq,
                        group_id: dialogue.dialogue_id.clone(),
                        turn_index,
                        payload,
                        tag: turn.speaker.clone(),
                    }),
                    Err(reason) => {
                        invalid_units += 1;
                        tracing::debug!(
                            "Skipping turn {} of dialogue '{}' in shard '{}': {}",
                            turn_index,
                            dialogue.dialogue_id,
                            shard.shard_id,
                            reason
                        );
                    }
                }
            }

            // Only dialogues with at least one valid utterance count
            // against the budget.
            if !group_units.is_empty() {
                units.extend(group_units);
                groups += 1;
                budget.count_group();
            }
        }

        EnumeratedShard::Work(ShardWork {
            shard_id: shard.shard_id,
            path: path.to_path_buf(),
            units,
            groups,
            invalid_units,
            truncated,
        })
    }

    /// Lazy shard-by-shard enumeration honoring the budget.
    pub fn into_iter(
        self,
        completed_shards: &HashSet<String>,
        processing: &ProcessingConfig,
    ) -> Result<ShardIter> {
        let paths = self.shard_paths(completed_shards)?;
        Ok(ShardIter {
            enumerator: self,
            paths: paths.into(),
            budget: GroupBudget::new(processing.max_groups, processing.budget_scope),
        })
    }
}

/// Iterator over enumerated shards. Stops early once a global budget is spent.
pub struct ShardIter {
    enumerator: Enumerator,
    paths: VecDeque<PathBuf>,
    budget: GroupBudget,
}

impl Iterator for ShardIter {
    type Item = EnumeratedShard;

    fn next(&mut self) -> Option<Self::Item> {
        if self.budget.globally_exhausted() {
            if !self.paths.is_empty() {
                tracing::info!(
                    "Group budget spent; leaving {} shard(s) for a later run",
                    self.paths.len()
                );
                self.paths.clear();
            }
            return None;
        }

        let path = self.paths.pop_front()?;
        Some(self.enumerator.enumerate_shard(&path, &mut self.budget))
    }
}

/// Validate an utterance: non-empty after trimming and length-bounded.
fn validate_payload(utterance: &str, max_len: usize) -> Result<String, String> {
    let trimmed = utterance.trim();
    if trimmed.is_empty() {
        return Err("empty after trimming".to_string());
    }
    if trimmed.chars().count() > max_len {
        return Err(format!(
            "exceeds maximum length ({} > {})",
            trimmed.chars().count(),
            max_len
        ));
    }
    Ok(trimmed.to_string())
}
