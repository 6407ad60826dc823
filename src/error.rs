//! Engine-wide error type.
//!
//! Every fallible path in the analysis core resolves to one of these kinds so
//! the HTTP layer can map them to status codes without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Upstream returned 404 for an item, or a requested run does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream rejected us with 429 and retries were exhausted.
    #[error("upstream rate limit exhausted: {0}")]
    RateLimited(String),

    /// Upstream was unreachable or kept answering 5xx after retries.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// A single request or the whole run exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Upstream answered 200 but the payload did not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// An internal consistency check failed.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// SQLite or filesystem failure in the run store / catalog cache.
    #[error("storage error: {0}")]
    Storage(String),

    /// An analysis run is already in flight; carries its run id when known.
    #[error("analysis already running")]
    Conflict { run_id: Option<i64> },

    /// The run was cancelled before completing.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration detected at startup or request time.
    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Transient errors are worth retrying at the request level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited(_) | EngineError::Upstream(_) | EngineError::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
