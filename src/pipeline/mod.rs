//! Pipeline orchestration: per-unit execution, batching, and run metrics.

mod executor;
mod metrics;
mod scheduler;

pub use executor::{ExecutedUnit, RetryPolicy, UnitExecutor, UnitStatus};
pub use metrics::{FailureRecord, Metrics, RunSummary};
pub use scheduler::{Scheduler, SchedulerConfig};
