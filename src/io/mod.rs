//! Durable storage: artifacts, rewritten shards, and the checkpoint file.

mod artifact_store;
mod checkpoint;

pub use artifact_store::ArtifactStore;
pub use checkpoint::{Checkpoint, CheckpointStore};
