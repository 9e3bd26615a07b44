//! Pluggable utterance transforms.
//!
//! The pipeline treats the transformation as a black box behind the
//! [`Transform`] trait; the built-in [`Corruptor`] is the reference
//! implementation. Heavier backends (synthesis, round-trip translation) plug
//! in at the same seam.

mod corruptor;

pub use corruptor::Corruptor;

use crate::corpus::WorkUnit;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Failure of one transform invocation.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// Retryable: network, timeout, rate limit. The executor backs off and
    /// tries again up to the attempt cap.
    #[error("transient transform failure: {0}")]
    Transient(String),

    /// Non-retryable: the input itself cannot be transformed.
    #[error("permanent transform failure: {0}")]
    Permanent(String),
}

impl TransformError {
    /// Whether the executor should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransformError::Transient(_))
    }
}

/// One utterance transformation backend.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Short name used in logs and the run summary.
    fn name(&self) -> &str;

    /// Determinism-relevant parameter fingerprint. Folded into every content
    /// id so artifacts produced under different parameters never collide.
    fn fingerprint(&self) -> String;

    /// Acquire the backing resource (model download, client handshake).
    /// Called at most once per process; the default is a no-op.
    async fn init(&self) -> Result<(), TransformError> {
        Ok(())
    }

    /// Transform one unit's payload.
    async fn apply(&self, unit: &WorkUnit) -> Result<String, TransformError>;
}

/// A transform plus a once-per-process initialization guard.
///
/// Workers share one instance; `ensure_init` is safe to call concurrently and
/// runs the underlying `init` at most once. A failed `init` leaves the cell
/// empty so a later call may retry.
#[derive(Clone)]
pub struct SharedTransform {
    inner: Arc<dyn Transform>,
    init: Arc<OnceCell<()>>,
}

impl SharedTransform {
    /// Wrap a transform backend.
    pub fn new(inner: Arc<dyn Transform>) -> Self {
        Self {
            inner,
            init: Arc::new(OnceCell::new()),
        }
    }

    /// Initialize the backend exactly once across all callers.
    pub async fn ensure_init(&self) -> Result<(), TransformError> {
        self.init
            .get_or_try_init(|| self.inner.init())
            .await
            .map(|_| ())
    }

    /// Access the underlying transform.
    pub fn transform(&self) -> &dyn Transform {
        self.inner.as_ref()
    }
}
