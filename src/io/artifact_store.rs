//! Filesystem artifact storage keyed by content identity.
//!
//! One file per unit under `<output_dir>/artifacts/`, named by the unit's
//! composed content id. The existence check on that path is what makes
//! re-runs idempotent. For text transforms the store also rewrites shard
//! documents with transformed payloads substituted back into each turn.

use crate::config::RewriteMode;
use crate::identity::ContentId;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Durable storage for transformation outputs.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    artifacts_dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the store rooted at the output directory.
    pub fn create(root: &Path) -> Result<Self> {
        let artifacts_dir = root.join("artifacts");
        std::fs::create_dir_all(&artifacts_dir)
            .with_context(|| format!("failed to create output dir {}", artifacts_dir.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            artifacts_dir,
        })
    }

    /// Path of the artifact for a content id.
    pub fn artifact_path(&self, id: &ContentId) -> PathBuf {
        self.artifacts_dir.join(format!("{}.txt", id.file_stem()))
    }

    /// Whether an artifact for this id already exists on disk.
    pub fn exists(&self, id: &ContentId) -> bool {
        self.artifact_path(id).exists()
    }

    /// Write an artifact atomically (temp file + rename).
    pub fn write(&self, id: &ContentId, text: &str) -> Result<()> {
        let path = self.artifact_path(id);
        let tmp = path.with_extension("txt.tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("failed to write artifact {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to finalize artifact {}", path.display()))?;
        Ok(())
    }

    /// Read an existing artifact back.
    pub fn read(&self, id: &ContentId) -> Result<String> {
        let path = self.artifact_path(id);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read artifact {}", path.display()))
    }

    /// Write a copy of a shard document with transformed payloads substituted
    /// back into each turn. Substitutions are keyed by
    /// `(dialogue_id, turn_index)`; turns without a substitution (failed or
    /// invalid units) keep their original text.
    ///
    /// Works on the raw JSON value so unknown fields survive the round trip.
    pub fn rewrite_shard(
        &self,
        source: &Path,
        substitutions: &HashMap<(String, usize), String>,
        mode: RewriteMode,
        annotate_field: &str,
    ) -> Result<()> {
        if mode == RewriteMode::None {
            return Ok(());
        }

        let contents = std::fs::read_to_string(source)
            .with_context(|| format!("failed to re-read shard {}", source.display()))?;
        let mut doc: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to re-parse shard {}", source.display()))?;

        if let Some(dialogues) = doc.as_array_mut() {
            for dialogue in dialogues {
                let dialogue_id = dialogue
                    .get("dialogue_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();

                let Some(turns) = dialogue.get_mut("turns").and_then(|t| t.as_array_mut()) else {
                    continue;
                };

                for (turn_index, turn) in turns.iter_mut().enumerate() {
                    let key = (dialogue_id.clone(), turn_index);
                    let Some(text) = substitutions.get(&key) else {
                        continue;
                    };
                    let field = match mode {
                        RewriteMode::Replace => "utterance",
                        RewriteMode::Annotate => annotate_field,
                        RewriteMode::None => unreachable!(),
                    };
                    turn[field] = serde_json::Value::String(text.clone());
                }
            }
        }

        let file_name = source
            .file_name()
            .context("shard path has no file name")?;
        let dest = self.root.join(file_name);
        let tmp = dest.with_extension("json.tmp");
        let rendered = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&tmp, rendered)
            .with_context(|| format!("failed to write rewritten shard {}", tmp.display()))?;
        std::fs::rename(&tmp, &dest)
            .with_context(|| format!("failed to finalize rewritten shard {}", dest.display()))?;

        tracing::debug!(
            "Rewrote shard {} with {} substitution(s)",
            dest.display(),
            substitutions.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_id() -> ContentId {
        ContentId::derive("hello there", "fp", "dialogues_001", 0, "USER")
    }

    #[test]
    fn test_write_then_exists_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).unwrap();
        let id = content_id();

        assert!(!store.exists(&id));
        store.write(&id, "hallo their").unwrap();
        assert!(store.exists(&id));
        assert_eq!(store.read(&id).unwrap(), "hallo their");
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).unwrap();
        store.write(&content_id(), "text").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    fn sample_shard(dir: &Path) -> PathBuf {
        let path = dir.join("dialogues_003.json");
        std::fs::write(
            &path,
            r#"[{"dialogue_id": "3_0", "extra_meta": true, "turns": [
                {"speaker": "USER", "utterance": "hello", "frames": []},
                {"speaker": "SYSTEM", "utterance": "hi"}
            ]}]"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_rewrite_annotate_keeps_original() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(output.path()).unwrap();
        let source = sample_shard(input.path());

        let subs = HashMap::from([(("3_0".to_string(), 0), "hallo".to_string())]);
        store
            .rewrite_shard(&source, &subs, RewriteMode::Annotate, "utterance_noisy")
            .unwrap();

        let rewritten: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(output.path().join("dialogues_003.json")).unwrap(),
        )
        .unwrap();
        let turn = &rewritten[0]["turns"][0];
        assert_eq!(turn["utterance"], "hello");
        assert_eq!(turn["utterance_noisy"], "hallo");
        // Untouched turn has no annotation
        assert!(rewritten[0]["turns"][1].get("utterance_noisy").is_none());
        // Unknown fields survive
        assert_eq!(rewritten[0]["extra_meta"], true);
        assert!(turn.get("frames").is_some());
    }

    #[test]
    fn test_rewrite_replace_overwrites_in_place() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(output.path()).unwrap();
        let source = sample_shard(input.path());

        let subs = HashMap::from([(("3_0".to_string(), 1), "hey".to_string())]);
        store
            .rewrite_shard(&source, &subs, RewriteMode::Replace, "unused")
            .unwrap();

        let rewritten: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(output.path().join("dialogues_003.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(rewritten[0]["turns"][1]["utterance"], "hey");
        assert_eq!(rewritten[0]["turns"][0]["utterance"], "hello");
    }

    #[test]
    fn test_rewrite_none_is_a_no_op() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(output.path()).unwrap();
        let source = sample_shard(input.path());

        store
            .rewrite_shard(&source, &HashMap::new(), RewriteMode::None, "unused")
            .unwrap();
        assert!(!output.path().join("dialogues_003.json").exists());
    }
}
