//! Durable progress record.
//!
//! The checkpoint file lists the shards whose units have all reached a
//! terminal state. It is read once at startup and rewritten atomically
//! (temp file + rename) after each commit, so a crash leaves either the old
//! or the new state, never a torn file.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The set of fully-processed shards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifiers of shards whose units all reached a terminal state
    pub completed_shards: BTreeSet<String>,
}

impl Checkpoint {
    /// Whether a shard is already fully processed.
    pub fn contains(&self, shard_id: &str) -> bool {
        self.completed_shards.contains(shard_id)
    }

    /// Number of completed shards.
    pub fn len(&self) -> usize {
        self.completed_shards.len()
    }

    /// Whether no shard has completed yet.
    pub fn is_empty(&self) -> bool {
        self.completed_shards.is_empty()
    }
}

/// Owns the checkpoint file and serializes all writes to it.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    checkpoint: Checkpoint,
}

impl CheckpointStore {
    /// Load prior progress. A missing file yields an empty checkpoint; an
    /// unreadable or corrupt file is an error, since silently starting over
    /// would re-generate artifacts the operator believes are accounted for.
    pub fn load(path: PathBuf) -> Result<Self> {
        let checkpoint = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("corrupt checkpoint file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Checkpoint::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read checkpoint {}", path.display()))
            }
        };

        if !checkpoint.is_empty() {
            tracing::info!(
                "Resuming: {} shard(s) already complete per {}",
                checkpoint.len(),
                path.display()
            );
        }

        Ok(Self { path, checkpoint })
    }

    /// Snapshot of the current checkpoint state.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Mark a shard complete and persist immediately.
    ///
    /// One retry is attempted on a failed persist; a second failure is
    /// [`PipelineError::CheckpointWrite`] and fatal to the run.
    pub fn commit(&mut self, shard_id: &str) -> Result<(), PipelineError> {
        if !self.checkpoint.completed_shards.insert(shard_id.to_string()) {
            return Ok(());
        }

        match self.persist() {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(
                    "Checkpoint write to {} failed ({}), retrying once",
                    self.path.display(),
                    first
                );
                std::thread::sleep(std::time::Duration::from_millis(100));
                self.persist().map_err(|source| PipelineError::CheckpointWrite {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// destination.
    fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = temp_path(&self.path);
        let json = serde_json::to_string_pretty(&self.checkpoint)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
