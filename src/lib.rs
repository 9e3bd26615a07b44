//! Resumable batch augmentation for sharded dialogue corpora.
//!
//! The pipeline scans a directory of JSON shard documents, enumerates one
//! work unit per dialogue turn, and drives each unit through a pluggable
//! [`Transform`](transform::Transform) with bounded concurrency. Outputs are
//! content-addressed artifacts on disk, so a re-run (after a crash, an
//! interrupt, or on purpose) skips everything that already exists; shard-level
//! progress is tracked in an atomically-written checkpoint file.
//!
//! [`run_pipeline`] wires the built-in corruption transform to a Ctrl-C
//! handler; [`run_pipeline_with`] accepts any backend and shutdown flag and is
//! the seam the tests use.

pub mod config;
pub mod corpus;
pub mod error;
pub mod identity;
pub mod io;
pub mod pipeline;
pub mod transform;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::RunSummary;

use crate::corpus::Enumerator;
use crate::io::{ArtifactStore, CheckpointStore};
use crate::pipeline::{Metrics, RetryPolicy, Scheduler, SchedulerConfig, UnitExecutor};
use crate::transform::{Corruptor, SharedTransform, Transform};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Run the pipeline with the built-in corruption transform.
///
/// Installs a Ctrl-C handler: the first interrupt finishes in-flight units
/// and checkpoints before returning, a second one aborts the process.
pub async fn run_pipeline(config: &Config) -> Result<RunSummary> {
    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(shutdown.clone());

    let transform: Arc<dyn Transform> = Arc::new(Corruptor::new(config.corruptor.clone()));
    run_pipeline_with(config, transform, shutdown).await
}

/// Run the pipeline with an explicit transform backend and shutdown flag.
pub async fn run_pipeline_with(
    config: &Config,
    transform: Arc<dyn Transform>,
    shutdown: Arc<AtomicBool>,
) -> Result<RunSummary> {
    config.validate()?;

    tracing::info!(
        "Starting augmentation: {} -> {} (transform '{}')",
        config.input.input_dir.display(),
        config.output.output_dir.display(),
        transform.name()
    );

    let store = Arc::new(ArtifactStore::create(&config.output.output_dir)?);
    let checkpoint = CheckpointStore::load(config.output.checkpoint_path())?;
    let completed: HashSet<String> = checkpoint
        .checkpoint()
        .completed_shards
        .iter()
        .cloned()
        .collect();

    let shared = SharedTransform::new(transform);
    initialize_transform(&shared, &config.processing.retry).await?;

    let shards = Enumerator::new(&config.input)
        .into_iter(&completed, &config.processing)
        .context("failed to enumerate input shards")?;

    let executor = Arc::new(UnitExecutor::new(
        shared,
        store.clone(),
        RetryPolicy::from_config(&config.processing.retry),
    ));

    let metrics = Metrics::new();
    let scheduler = Scheduler::new(
        executor,
        store,
        checkpoint,
        metrics,
        SchedulerConfig {
            batch_size: config.processing.batch_size,
            concurrency: config.processing.concurrency,
            save_interval: config.processing.effective_save_interval(),
            rewrite: config.output.rewrite,
            annotate_field: config.output.annotate_field.clone(),
        },
        shutdown,
    );

    let summary = scheduler.run(shards).await?;
    summary.log_failures();
    tracing::info!("{}", summary);
    Ok(summary)
}

/// Initialize the transform backend, retrying transient failures under the
/// same attempt cap as unit execution. Exhaustion is fatal.
async fn initialize_transform(
    shared: &SharedTransform,
    retry: &config::RetryConfig,
) -> Result<(), PipelineError> {
    let policy = RetryPolicy::from_config(retry);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match shared.ensure_init().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.max_attempts() => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "Transform init attempt {} failed: {}, retrying in {}ms",
                    attempt,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(PipelineError::Initialization {
                    attempts: attempt,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// First Ctrl-C requests a graceful stop; a second aborts immediately.
fn spawn_interrupt_watcher(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("Interrupt received; finishing in-flight work");
        shutdown.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("Second interrupt; aborting");
            std::process::exit(130);
        }
    });
}

/// Build a Tokio runtime with the configured number of worker threads.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }
    builder.build().context("failed to build async runtime")
}
