//! Per-unit transform execution with retry and idempotence short-circuit.

use crate::config::RetryConfig;
use crate::corpus::WorkUnit;
use crate::identity::ContentId;
use crate::io::ArtifactStore;
use crate::transform::SharedTransform;
use std::sync::Arc;
use std::time::Duration;

/// Explicit retry policy: attempt cap plus exponential capped backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    /// Build from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// Maximum attempts per unit, first try included.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before the attempt following `completed_attempts`. Doubles per
    /// attempt, never exceeding the cap.
    pub fn delay_after(&self, completed_attempts: usize) -> Duration {
        let exponent = completed_attempts.saturating_sub(1).min(32) as u32;
        let delay = self.base.saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.cap)
    }
}

/// Terminal state of one executed unit.
#[derive(Debug, Clone)]
pub enum UnitStatus {
    /// Transformed in this run; artifact written.
    Done { text: String },

    /// Artifact already existed; transform not invoked.
    Reused { text: String },

    /// All attempts failed; the unit is recorded and the run continues.
    Failed { reason: String, permanent: bool },
}

/// A work unit with its terminal outcome.
#[derive(Debug, Clone)]
pub struct ExecutedUnit {
    pub unit: WorkUnit,
    pub content_id: ContentId,
    pub status: UnitStatus,
}

/// Applies the transform to single units under the retry policy.
pub struct UnitExecutor {
    transform: SharedTransform,
    store: Arc<ArtifactStore>,
    policy: RetryPolicy,
    /// Cached transform fingerprint, folded into every content id
    fingerprint: String,
}

impl UnitExecutor {
    /// Create an executor.
    pub fn new(transform: SharedTransform, store: Arc<ArtifactStore>, policy: RetryPolicy) -> Self {
        let fingerprint = transform.transform().fingerprint();
        Self {
            transform,
            store,
            policy,
            fingerprint,
        }
    }

    /// Derive the content identity for a unit.
    pub fn content_id(&self, unit: &WorkUnit) -> ContentId {
        ContentId::derive(
            &unit.payload,
            &self.fingerprint,
            &unit.shard_id,
            unit.sequence_index,
            &unit.tag,
        )
    }

    /// Drive one unit to a terminal state.
    ///
    /// Checks durable storage first: an existing artifact is returned without
    /// invoking the transform. Otherwise the transform runs under the retry
    /// policy; only transient errors are retried. Failures never propagate,
    /// they are folded into the returned status.
    pub async fn execute(&self, unit: WorkUnit) -> ExecutedUnit {
        let content_id = self.content_id(&unit);

        if self.store.exists(&content_id) {
            match self.store.read(&content_id) {
                Ok(text) => {
                    tracing::debug!("Artifact '{}' exists, skipping transform", content_id);
                    return ExecutedUnit {
                        unit,
                        content_id,
                        status: UnitStatus::Reused { text },
                    };
                }
                Err(e) => {
                    // Unreadable artifact: fall through and regenerate it.
                    tracing::warn!("Failed to read existing artifact '{}': {}", content_id, e);
                }
            }
        }

        let status = self.attempt_loop(&unit, &content_id).await;
        ExecutedUnit {
            unit,
            content_id,
            status,
        }
    }

    async fn attempt_loop(&self, unit: &WorkUnit, content_id: &ContentId) -> UnitStatus {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match self.transform.transform().apply(unit).await {
                Ok(text) => match self.store.write(content_id, &text) {
                    Ok(()) => return UnitStatus::Done { text },
                    // A failed artifact write is retried like a transient
                    // transform failure.
                    Err(e) => Err((format!("artifact write failed: {e:#}"), false)),
                },
                Err(e) => Err((e.to_string(), !e.is_transient())),
            };

            let (reason, permanent) = match result {
                Err(pair) => pair,
                Ok(()) => unreachable!(),
            };

            if permanent {
                tracing::warn!("Unit '{}' failed permanently: {}", content_id, reason);
                return UnitStatus::Failed { reason, permanent };
            }

            if attempt >= self.policy.max_attempts() {
                tracing::error!(
                    "Unit '{}' failed after {} attempts: {}",
                    content_id,
                    attempt,
                    reason
                );
                return UnitStatus::Failed {
                    reason: format!("{reason} (after {attempt} attempts)"),
                    permanent: false,
                };
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                "Unit '{}' attempt {} failed: {}, retrying in {}ms",
                content_id,
                attempt,
                reason,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
