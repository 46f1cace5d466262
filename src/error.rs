use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed job submission. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The engine is already running `max_concurrent_jobs` jobs.
    #[error("Engine at capacity: {running} of {limit} jobs running")]
    Capacity { running: usize, limit: usize },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Engine is shutting down")]
    ShuttingDown,

    /// The job's supervising task went away without delivering a final snapshot.
    #[error("Job {0} was aborted before reporting a result")]
    JobAborted(Uuid),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Marks a handler failure as not worth retrying.
///
/// Wrap the error before returning it from a handler; the default retry
/// policy settles the item as failed on the first `Permanent` error.
///
/// ```
/// use batchrun::Permanent;
///
/// fn lookup(code: &str) -> anyhow::Result<u32> {
///     if code.is_empty() {
///         return Err(Permanent::new("empty product code").into());
///     }
///     Ok(code.len() as u32)
/// }
///
/// assert!(lookup("").unwrap_err().is::<Permanent>());
/// ```
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Permanent(pub String);

impl Permanent {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Distinguishes handler failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Worth another attempt (timeouts, rate limits, flaky upstreams).
    Transient,
    /// Retrying cannot help (bad input, rejected request).
    Permanent,
}

impl FailureKind {
    pub fn of(err: &anyhow::Error) -> Self {
        if err.is::<Permanent>() {
            FailureKind::Permanent
        } else {
            FailureKind::Transient
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "Transient"),
            FailureKind::Permanent => write!(f, "Permanent"),
        }
    }
}
