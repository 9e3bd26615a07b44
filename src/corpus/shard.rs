//! Shard document model and filename conventions.
//!
//! A shard is one JSON file holding an ordered list of dialogues; each
//! dialogue has a stable identifier and an ordered list of turns. Shard
//! filenames follow `dialogues_NNN.json`, where `NNN` is a group-number hint
//! cross-checked against the embedded dialogue identifiers.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single turn within a dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker role (e.g. "USER", "SYSTEM")
    #[serde(default = "default_speaker")]
    pub speaker: String,

    /// Utterance text
    #[serde(default)]
    pub utterance: String,

    /// Any additional per-turn fields, preserved through rewriting
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_speaker() -> String {
    "UNKNOWN".to_string()
}

/// A dialogue: an ordered group of turns sharing one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    /// Stable group identifier (e.g. "3_0")
    #[serde(default)]
    pub dialogue_id: String,

    /// Ordered turns
    #[serde(default)]
    pub turns: Vec<Turn>,

    /// Any additional per-dialogue fields, preserved through rewriting
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A parsed shard document.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Shard identifier: the file stem (e.g. "dialogues_003")
    pub shard_id: String,

    /// Path of the source document
    pub path: PathBuf,

    /// Dialogues in document order
    pub dialogues: Vec<Dialogue>,
}

impl Shard {
    /// Load and parse one shard document.
    ///
    /// A malformed document yields [`PipelineError::Decode`]; the caller skips
    /// the shard and continues with the next one.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let shard_id = shard_id_for(path);

        let contents = std::fs::read_to_string(path).map_err(|e| PipelineError::Decode {
            shard_id: shard_id.clone(),
            source: serde_json::Error::io(e),
        })?;

        let dialogues: Vec<Dialogue> =
            serde_json::from_str(&contents).map_err(|source| PipelineError::Decode {
                shard_id: shard_id.clone(),
                source,
            })?;

        let shard = Self {
            shard_id,
            path: path.to_path_buf(),
            dialogues,
        };
        shard.check_group_numbers();
        Ok(shard)
    }

    /// Cross-check embedded dialogue identifiers against the filename hint.
    /// Mismatches are logged, never fatal.
    fn check_group_numbers(&self) {
        let Some(hint) = file_number_hint(&self.shard_id) else {
            tracing::debug!("No group-number hint in shard name '{}'", self.shard_id);
            return;
        };

        for dialogue in &self.dialogues {
            match group_number(&dialogue.dialogue_id) {
                Some(number) if number != hint => {
                    tracing::warn!(
                        "Dialogue '{}' does not match file number {} in shard '{}'",
                        dialogue.dialogue_id,
                        hint,
                        self.shard_id
                    );
                }
                Some(_) => {}
                None => {
                    tracing::warn!(
                        "Dialogue id '{}' in shard '{}' has no numeric prefix",
                        dialogue.dialogue_id,
                        self.shard_id
                    );
                }
            }
        }
    }
}

/// Shard identifier for a document path: the file stem.
pub fn shard_id_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Extract the numeric hint from a shard name, e.g. `dialogues_001` -> 1.
pub fn file_number_hint(shard_id: &str) -> Option<u64> {
    let (_, suffix) = shard_id.split_once('_')?;
    let trimmed = suffix.trim_start_matches('0');
    if trimmed.is_empty() && !suffix.is_empty() {
        // all zeros
        return Some(0);
    }
    trimmed.parse().ok()
}

/// Extract the group number from a dialogue id, e.g. "3_0" -> 3.
pub fn group_number(dialogue_id: &str) -> Option<u64> {
    let prefix = dialogue_id.split('_').next()?;
    prefix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_number_hint() {
        assert_eq!(file_number_hint("dialogues_001"), Some(1));
        assert_eq!(file_number_hint("dialogues_120"), Some(120));
        assert_eq!(file_number_hint("dialogues_000"), Some(0));
        assert_eq!(file_number_hint("nodigits"), None);
        assert_eq!(file_number_hint("dialogues_xyz"), None);
    }

    #[test]
    fn test_group_number() {
        assert_eq!(group_number("3_0"), Some(3));
        assert_eq!(group_number("127_15"), Some(127));
        assert_eq!(group_number("abc_0"), None);
    }

    #[test]
    fn test_turn_preserves_unknown_fields() {
        let json = r#"{"speaker": "USER", "utterance": "hi", "frames": [1, 2]}"#;
        let turn: Turn = serde_json::from_str(json).unwrap();
        assert_eq!(turn.speaker, "USER");
        assert!(turn.extra.contains_key("frames"));

        let round = serde_json::to_value(&turn).unwrap();
        assert_eq!(round["frames"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_missing_speaker_defaults_unknown() {
        let json = r#"{"utterance": "hi"}"#;
        let turn: Turn = serde_json::from_str(json).unwrap();
        assert_eq!(turn.speaker, "UNKNOWN");
    }

    #[test]
    fn test_load_malformed_shard_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogues_001.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Shard::load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
        assert!(err.to_string().contains("dialogues_001"));
    }

    #[test]
    fn test_load_valid_shard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogues_003.json");
        std::fs::write(
            &path,
            r#"[{"dialogue_id": "3_0", "turns": [
                {"speaker": "USER", "utterance": "hello"},
                {"speaker": "SYSTEM", "utterance": "hi there"}
            ]}]"#,
        )
        .unwrap();

        let shard = Shard::load(&path).unwrap();
        assert_eq!(shard.shard_id, "dialogues_003");
        assert_eq!(shard.dialogues.len(), 1);
        assert_eq!(shard.dialogues[0].turns.len(), 2);
    }
}
