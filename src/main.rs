//! Dialogue Augmentation CLI
//!
//! Resumable batch pipeline applying text transforms to sharded dialogue
//! corpora.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dialogue_augment::{build_runtime, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "dialogue-augment")]
#[command(about = "Augment sharded dialogue corpora with resumable transforms", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Override the dialogue group budget
    #[arg(long, global = true)]
    max_groups: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the augmentation pipeline (default if no command specified)
    Run,

    /// Enumerate the work without processing
    Analyze,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.concurrency, cli.max_groups)?;
        }

        Some(Commands::Analyze) => {
            analyze_command(cli.config, cli.max_groups)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, concurrency: Option<usize>, max_groups: Option<usize>) {
    if let Some(c) = concurrency {
        config.processing.concurrency = c;
    }
    if let Some(m) = max_groups {
        config.processing.max_groups = Some(m);
    }
}

fn run_command(
    config_path: PathBuf,
    concurrency: Option<usize>,
    max_groups: Option<usize>,
) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    apply_overrides(&mut config, concurrency, max_groups);
    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    let summary = runtime.block_on(async { run_pipeline(&config).await })?;

    // Unit-level failures are reported in the summary but do not fail the
    // process; only fatal errors (init, checkpoint, config) do.
    if summary.units_failed > 0 {
        tracing::warn!(
            "{} unit(s) failed; see the failure log above",
            summary.units_failed
        );
    }
    Ok(())
}

fn analyze_command(config_path: PathBuf, max_groups: Option<usize>) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    apply_overrides(&mut config, None, max_groups);
    config.validate()?;
    analyze_work(&config)
}

fn analyze_work(config: &Config) -> Result<()> {
    use dialogue_augment::corpus::{EnumeratedShard, Enumerator};
    use dialogue_augment::io::CheckpointStore;
    use std::collections::HashSet;

    let checkpoint = CheckpointStore::load(config.output.checkpoint_path())?;
    let completed: HashSet<String> = checkpoint
        .checkpoint()
        .completed_shards
        .iter()
        .cloned()
        .collect();

    let mut shards = 0usize;
    let mut undecodable = 0usize;
    let mut truncated = 0usize;
    let mut groups = 0usize;
    let mut units = 0usize;
    let mut invalid = 0usize;

    for outcome in Enumerator::new(&config.input).into_iter(&completed, &config.processing)? {
        match outcome {
            EnumeratedShard::Work(work) => {
                shards += 1;
                groups += work.groups;
                units += work.units.len();
                invalid += work.invalid_units;
                if work.truncated {
                    truncated += 1;
                }
            }
            EnumeratedShard::DecodeFailed { shard_id, error } => {
                undecodable += 1;
                tracing::warn!("Shard '{}' would be skipped: {}", shard_id, error);
            }
        }
    }

    println!("\n=== Work Analysis ===");
    println!("Already complete:  {} shard(s)", completed.len());
    println!("Shards to process: {}", shards);
    println!("Undecodable:       {}", undecodable);
    println!("Budget-truncated:  {}", truncated);
    println!("Dialogue groups:   {}", groups);
    println!("Work units:        {}", units);
    println!("Invalid turns:     {}", invalid);
    match config.processing.max_groups {
        Some(max) => println!("Group budget:      {} ({:?})", max, config.processing.budget_scope),
        None => println!("Group budget:      unlimited"),
    }
    println!("=====================\n");

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Dialogue Augmentation Pipeline Configuration

# === INPUT: Where to read dialogue shards from ===
input:
  # Directory of JSON shard documents (e.g. dialogues_001.json)
  input_dir: "dev"

  # Reject utterances longer than this many characters
  max_payload_len: 500

# === OUTPUT: Where artifacts and rewritten shards go ===
output:
  output_dir: "dev_augmented"

  # How transformed text is substituted back into shard documents:
  #   annotate - add the transformed text as an extra field (default)
  #   replace  - overwrite the original utterance in place
  #   none     - artifacts only, no shard rewriting
  rewrite: annotate

  # Field name used when rewrite = annotate
  annotate_field: "utterance_noisy"

  # Checkpoint file location (default: <output_dir>/augment_progress.json)
  # checkpoint_path: "dev_augmented/augment_progress.json"

# === PROCESSING: Performance and resumption tuning ===
processing:
  # Work units accumulated per batch
  batch_size: 32

  # Units processed concurrently within a batch
  concurrency: 4

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Cap on fully-processed dialogue groups (omit = unlimited)
  # max_groups: 1000

  # Whether max_groups applies across the run or per shard
  # budget_scope: global

  # Checkpoint commit cadence in completed units
  # (omit to derive max(batch_size / 10, 1))
  # save_interval: 3

  # Retry configuration for transient transform failures
  retry:
    max_attempts: 3
    backoff_base_ms: 500
    backoff_cap_ms: 10000

# === CORRUPTOR: Built-in text corruption transform ===
corruptor:
  # Probability that a word is considered for corruption
  word_prob: 0.4

  # Probability that a matching phoneme inside a word is substituted
  phoneme_prob: 0.4

  # RNG seed for reproducible corruption (omit for entropy)
  # seed: 42
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
