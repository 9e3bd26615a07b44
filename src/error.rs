//! Error taxonomy for the augmentation pipeline.
//!
//! Unit-scoped errors (`Decode`, `Validation`, transform failures) are recorded
//! and surfaced in the run summary; they never abort the run. `Initialization`
//! and `CheckpointWrite` are fatal and propagate to the driver.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal and shard-scoped pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A shard document could not be parsed. The shard is skipped.
    #[error("failed to decode shard '{shard_id}': {source}")]
    Decode {
        shard_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A unit payload failed validity checks. The unit is skipped.
    #[error("invalid payload in shard '{shard_id}' at turn {sequence_index}: {reason}")]
    Validation {
        shard_id: String,
        sequence_index: usize,
        reason: String,
    },

    /// The transform backend could not be acquired. Aborts the run.
    #[error("transform backend initialization failed after {attempts} attempts: {message}")]
    Initialization { attempts: usize, message: String },

    /// The checkpoint could not be persisted. Aborts the run: without a
    /// durable checkpoint the pipeline cannot safely claim progress.
    #[error("failed to write checkpoint to {path}: {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Whether this error must terminate the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Initialization { .. } | PipelineError::CheckpointWrite { .. }
        )
    }
}
