//! End-to-end runs against real directories: idempotence, resumption,
//! budgets, and failure isolation.

use async_trait::async_trait;
use dialogue_augment::config::{
    Config, CorruptorConfig, InputConfig, OutputConfig, ProcessingConfig, RewriteMode,
};
use dialogue_augment::corpus::WorkUnit;
use dialogue_augment::io::CheckpointStore;
use dialogue_augment::transform::{Transform, TransformError};
use dialogue_augment::run_pipeline_with;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Uppercases payloads, counting invocations. Payloads containing "POISON"
/// fail permanently.
struct Upper {
    calls: AtomicUsize,
}

impl Upper {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transform for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn fingerprint(&self) -> String {
        "upper/v1".to_string()
    }

    async fn apply(&self, unit: &WorkUnit) -> Result<String, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if unit.payload.contains("POISON") {
            return Err(TransformError::Permanent("unusable input".to_string()));
        }
        Ok(unit.payload.to_uppercase())
    }
}

fn config(input: &Path, output: &Path) -> Config {
    Config {
        input: InputConfig {
            input_dir: input.to_path_buf(),
            max_payload_len: 500,
        },
        output: OutputConfig {
            output_dir: output.to_path_buf(),
            rewrite: RewriteMode::Annotate,
            annotate_field: "utterance_noisy".to_string(),
            checkpoint_path: None,
        },
        processing: ProcessingConfig {
            batch_size: 4,
            concurrency: 2,
            ..Default::default()
        },
        corruptor: CorruptorConfig::default(),
    }
}

fn write_shard(dir: &Path, name: &str, json: &str) {
    std::fs::write(dir.join(name), json).unwrap();
}

fn no_shutdown() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[tokio::test]
async fn test_full_run_produces_artifacts_and_checkpoint() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(
        input.path(),
        "dialogues_001.json",
        r#"[{"dialogue_id": "1_0", "turns": [
            {"speaker": "USER", "utterance": "hello there"},
            {"speaker": "SYSTEM", "utterance": "hi, how can I help?"}
        ]}]"#,
    );
    write_shard(
        input.path(),
        "dialogues_002.json",
        r#"[{"dialogue_id": "2_0", "turns": [
            {"speaker": "USER", "utterance": "book a table"}
        ]}]"#,
    );

    let config = config(input.path(), output.path());
    let transform = Upper::new();
    let summary = run_pipeline_with(&config, transform.clone(), no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.units_succeeded, 3);
    assert_eq!(summary.shards_completed, 2);
    assert_eq!(summary.units_failed, 0);
    assert!(!summary.interrupted);
    assert_eq!(transform.calls.load(Ordering::SeqCst), 3);

    // Checkpoint records both shards.
    let checkpoint = CheckpointStore::load(config.output.checkpoint_path()).unwrap();
    assert!(checkpoint.checkpoint().contains("dialogues_001"));
    assert!(checkpoint.checkpoint().contains("dialogues_002"));

    // Artifacts exist.
    let artifacts: Vec<_> = std::fs::read_dir(output.path().join("artifacts"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(artifacts.len(), 3);

    // Rewritten shards carry the annotation next to the original.
    let rewritten: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(output.path().join("dialogues_001.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(rewritten[0]["turns"][0]["utterance"], "hello there");
    assert_eq!(rewritten[0]["turns"][0]["utterance_noisy"], "HELLO THERE");
}

#[tokio::test]
async fn test_second_run_reuses_artifacts_without_reinvoking() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(
        input.path(),
        "dialogues_001.json",
        r#"[{"dialogue_id": "1_0", "turns": [
            {"speaker": "USER", "utterance": "same text"},
            {"speaker": "SYSTEM", "utterance": "other text"}
        ]}]"#,
    );

    let config = config(input.path(), output.path());

    let first = Upper::new();
    run_pipeline_with(&config, first.clone(), no_shutdown())
        .await
        .unwrap();
    assert_eq!(first.calls.load(Ordering::SeqCst), 2);

    // Clear the checkpoint so the shard is enumerated again; the artifacts
    // alone must make the second run a no-op for the transform.
    std::fs::remove_file(config.output.checkpoint_path()).unwrap();

    let second = Upper::new();
    let summary = run_pipeline_with(&config, second.clone(), no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.units_reused, 2);
    assert_eq!(summary.units_succeeded, 0);
    assert_eq!(summary.shards_completed, 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_completed_shards_skipped_on_resume() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(
        input.path(),
        "dialogues_003.json",
        r#"[{"dialogue_id": "3_0", "turns": [
            {"speaker": "USER", "utterance": "first"},
            {"speaker": "SYSTEM", "utterance": "second"}
        ]}]"#,
    );

    let mut config = config(input.path(), output.path());
    config.processing.max_groups = Some(1);

    let first = Upper::new();
    let summary = run_pipeline_with(&config, first.clone(), no_shutdown())
        .await
        .unwrap();
    assert_eq!(summary.units_succeeded, 2);
    assert_eq!(summary.shards_completed, 1);

    // The shard is checkpointed, so resuming enumerates nothing at all.
    let second = Upper::new();
    let summary = run_pipeline_with(&config, second.clone(), no_shutdown())
        .await
        .unwrap();
    assert_eq!(summary.units_succeeded, 0);
    assert_eq!(summary.units_reused, 0);
    assert_eq!(summary.groups_enumerated, 0);
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_group_budget_defers_work_to_a_later_run() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(
        input.path(),
        "dialogues_001.json",
        r#"[{"dialogue_id": "1_0", "turns": [{"speaker": "USER", "utterance": "one"}]}]"#,
    );
    write_shard(
        input.path(),
        "dialogues_002.json",
        r#"[{"dialogue_id": "2_0", "turns": [{"speaker": "USER", "utterance": "two"}]}]"#,
    );

    let mut config = config(input.path(), output.path());
    config.processing.max_groups = Some(1);

    let first = Upper::new();
    let summary = run_pipeline_with(&config, first.clone(), no_shutdown())
        .await
        .unwrap();
    assert_eq!(summary.shards_completed, 1);
    assert_eq!(summary.units_succeeded, 1);

    // Second run picks up exactly the remaining shard.
    let second = Upper::new();
    let summary = run_pipeline_with(&config, second.clone(), no_shutdown())
        .await
        .unwrap();
    assert_eq!(summary.shards_completed, 1);
    assert_eq!(summary.units_succeeded, 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);

    let checkpoint = CheckpointStore::load(config.output.checkpoint_path()).unwrap();
    assert_eq!(checkpoint.checkpoint().len(), 2);
}

#[tokio::test]
async fn test_budget_truncated_shard_finishes_on_resume() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(
        input.path(),
        "dialogues_001.json",
        r#"[
            {"dialogue_id": "1_0", "turns": [{"speaker": "USER", "utterance": "alpha"}]},
            {"dialogue_id": "1_1", "turns": [{"speaker": "USER", "utterance": "beta"}]}
        ]"#,
    );

    let mut config = config(input.path(), output.path());
    config.processing.max_groups = Some(1);

    let first = Upper::new();
    let summary = run_pipeline_with(&config, first.clone(), no_shutdown())
        .await
        .unwrap();
    // One group processed, shard deliberately not checkpointed.
    assert_eq!(summary.units_succeeded, 1);
    assert_eq!(summary.shards_completed, 0);
    assert_eq!(summary.shards_deferred, 1);

    // Unlimited second run: the first group's artifact is reused, the
    // second group is transformed, and the shard completes.
    config.processing.max_groups = None;
    let second = Upper::new();
    let summary = run_pipeline_with(&config, second.clone(), no_shutdown())
        .await
        .unwrap();
    assert_eq!(summary.units_reused, 1);
    assert_eq!(summary.units_succeeded, 1);
    assert_eq!(summary.shards_completed, 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_permanent_failure_does_not_block_other_units() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(
        input.path(),
        "dialogues_001.json",
        r#"[{"dialogue_id": "1_0", "turns": [
            {"speaker": "USER", "utterance": "fine"},
            {"speaker": "SYSTEM", "utterance": "POISON pill"},
            {"speaker": "USER", "utterance": "also fine"}
        ]}]"#,
    );

    let config = config(input.path(), output.path());
    let transform = Upper::new();
    let summary = run_pipeline_with(&config, transform, no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.units_succeeded, 2);
    assert_eq!(summary.units_failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].reason.contains("unusable input"));
    // Every unit reached a terminal state, so the shard still completes.
    assert_eq!(summary.shards_completed, 1);

    // The rewritten shard keeps the failed turn untouched.
    let rewritten: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(output.path().join("dialogues_001.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(rewritten[0]["turns"][0]["utterance_noisy"], "FINE");
    assert!(rewritten[0]["turns"][1].get("utterance_noisy").is_none());
    assert_eq!(rewritten[0]["turns"][2]["utterance_noisy"], "ALSO FINE");
}

#[tokio::test]
async fn test_undecodable_shard_skipped_others_proceed() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_shard(input.path(), "dialogues_001.json", "[{not json");
    write_shard(
        input.path(),
        "dialogues_002.json",
        r#"[{"dialogue_id": "2_0", "turns": [{"speaker": "USER", "utterance": "ok"}]}]"#,
    );

    let config = config(input.path(), output.path());
    let summary = run_pipeline_with(&config, Upper::new(), no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.shards_decode_failed, 1);
    assert_eq!(summary.shards_completed, 1);
    assert_eq!(summary.units_succeeded, 1);

    // The broken shard must not be checkpointed.
    let checkpoint = CheckpointStore::load(config.output.checkpoint_path()).unwrap();
    assert!(!checkpoint.checkpoint().contains("dialogues_001"));
}

#[tokio::test]
async fn test_invalid_turns_counted_not_fatal() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let long = "x".repeat(600);
    write_shard(
        input.path(),
        "dialogues_001.json",
        &format!(
            r#"[{{"dialogue_id": "1_0", "turns": [
                {{"speaker": "USER", "utterance": "   "}},
                {{"speaker": "SYSTEM", "utterance": "{long}"}},
                {{"speaker": "USER", "utterance": "valid"}}
            ]}}]"#
        ),
    );

    let config = config(input.path(), output.path());
    let summary = run_pipeline_with(&config, Upper::new(), no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.units_invalid, 2);
    assert_eq!(summary.units_succeeded, 1);
    assert_eq!(summary.shards_completed, 1);
}
