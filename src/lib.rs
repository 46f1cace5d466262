//! In-process batch job execution.
//!
//! A job is a list of inputs run through one [`Handler`]. The [`Engine`]
//! bounds how many jobs run at once and how many items of a job run at once,
//! rate-limits handler calls per resource class, retries failed items with
//! exponential backoff and tracks progress for every job.

mod batch;
mod config;
mod engine;
mod error;
mod executor;
mod handler;
pub mod logging;
mod rate_limit;
mod retry;
mod scheduler;

pub use batch::{
    Item, ItemFailure, ItemObserver, ItemStatus, Job, JobOptions, JobStatus, JobSummary, Priority,
    PriorityFn, Progress,
};
pub use config::{DEFAULT_CONFIG_FILE, EngineConfig};
pub use engine::{Engine, EngineBuilder, EngineStatistics, JobHandle};
pub use error::{EngineError, FailureKind, Permanent, Result};
pub use handler::{FnHandler, Handler, ItemContext, handler_fn};
pub use rate_limit::{DEFAULT_RESOURCE_CLASS, RateLimiter};
pub use retry::{ExponentialBackoff, RetryPolicy};
