//! Configuration for the dialogue augmentation pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the augmentation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    pub input: InputConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Parameters for the built-in corruption transform
    #[serde(default)]
    pub corruptor: CorruptorConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory of shard documents (JSON files of dialogues)
    pub input_dir: PathBuf,

    /// Maximum accepted utterance length in characters
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving per-unit artifacts and rewritten shards
    pub output_dir: PathBuf,

    /// How transformed payloads are substituted back into shard documents
    #[serde(default)]
    pub rewrite: RewriteMode,

    /// Field name used when `rewrite = annotate`
    #[serde(default = "default_annotate_field")]
    pub annotate_field: String,

    /// Path of the checkpoint file. Defaults to `augment_progress.json`
    /// inside the output directory.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

impl OutputConfig {
    /// Resolve the checkpoint path, applying the default location.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join("augment_progress.json"))
    }
}

/// Shard rewrite behavior for text transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteMode {
    /// Do not rewrite shard documents; artifacts only.
    None,

    /// Add the transformed text as an extra field, keeping the original.
    #[default]
    Annotate,

    /// Replace the original utterance text in place.
    Replace,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Units accumulated per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of units processed concurrently within a batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads (None = num CPUs)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Cap on fully-processed dialogue groups (None = unlimited)
    #[serde(default)]
    pub max_groups: Option<usize>,

    /// Whether `max_groups` applies across the whole run or per shard
    #[serde(default)]
    pub budget_scope: BudgetScope,

    /// Checkpoint commit cadence in completed units.
    /// None derives `max(batch_size / 10, 1)`.
    #[serde(default)]
    pub save_interval: Option<usize>,

    /// Retry configuration for transient transform failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ProcessingConfig {
    /// Commit cadence in completed units, derived from the batch size when
    /// not configured explicitly.
    pub fn effective_save_interval(&self) -> usize {
        self.save_interval
            .unwrap_or_else(|| (self.batch_size / 10).max(1))
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            worker_threads: None,
            max_groups: None,
            budget_scope: BudgetScope::default(),
            save_interval: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Scope of the group budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    /// One budget shared by all shards in the run.
    #[default]
    Global,

    /// The budget resets for every shard.
    PerShard,
}

/// Retry configuration for transient transform failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per unit (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff in milliseconds (doubles each retry)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 10_000,
        }
    }
}

/// Parameters for the built-in text corruption transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptorConfig {
    /// Probability that a word is considered for corruption
    #[serde(default = "default_word_prob")]
    pub word_prob: f64,

    /// Probability that a matching phoneme inside a word is substituted
    #[serde(default = "default_phoneme_prob")]
    pub phoneme_prob: f64,

    /// RNG seed for reproducible corruption (None = entropy)
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for CorruptorConfig {
    fn default() -> Self {
        Self {
            word_prob: 0.4,
            phoneme_prob: 0.4,
            seed: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.batch_size == 0 {
            anyhow::bail!("batch_size must be > 0");
        }
        if self.processing.concurrency == 0 {
            anyhow::bail!("concurrency must be > 0");
        }
        if self.processing.retry.max_attempts == 0 {
            anyhow::bail!("max_attempts must be > 0");
        }
        if self.processing.retry.backoff_base_ms > self.processing.retry.backoff_cap_ms {
            anyhow::bail!("backoff_base_ms must not exceed backoff_cap_ms");
        }
        if self.input.max_payload_len == 0 {
            anyhow::bail!("max_payload_len must be > 0");
        }
        if let Some(interval) = self.processing.save_interval {
            if interval == 0 {
                anyhow::bail!("save_interval must be > 0 when set");
            }
        }
        if !(0.0..=1.0).contains(&self.corruptor.word_prob)
            || !(0.0..=1.0).contains(&self.corruptor.phoneme_prob)
        {
            anyhow::bail!("corruptor probabilities must be within [0, 1]");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_max_payload_len() -> usize {
    500
}
fn default_annotate_field() -> String {
    "utterance_noisy".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_concurrency() -> usize {
    4
}
fn default_max_attempts() -> usize {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    10_000
}
fn default_word_prob() -> f64 {
    0.4
}
fn default_phoneme_prob() -> f64 {
    0.4
}
