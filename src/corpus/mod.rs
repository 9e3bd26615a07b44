//! Work enumeration over sharded dialogue documents.

mod enumerator;
mod shard;

pub use enumerator::{EnumeratedShard, Enumerator, GroupBudget, ShardWork};
pub use shard::{file_number_hint, group_number, Dialogue, Shard, Turn};

/// One unit of transformation input: a single utterance within a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Identifier of the source shard document (file stem)
    pub shard_id: String,

    /// Position of the unit within its shard, counted over all turns.
    /// Stable and zero-based; unique per `(shard_id, sequence_index)`.
    pub sequence_index: usize,

    /// Identifier of the dialogue the unit belongs to
    pub group_id: String,

    /// Position of the turn within its dialogue, for substitution back
    /// into the source document
    pub turn_index: usize,

    /// The utterance text to transform
    pub payload: String,

    /// Speaker role, carried through to the artifact name
    pub tag: String,
}
