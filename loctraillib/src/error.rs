//! Error types for loctraillib

use thiserror::Error;

/// A rejected cache payload, naming the offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Path of the offending field, e.g. `result.days[3].languages.rust`
    pub field: String,
    /// Human-readable reason
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while analyzing history or serving cached results
#[derive(Error, Debug)]
pub enum LoctrailError {
    /// Git object or reference access failed
    #[error("git error: {0}")]
    Git(String),

    /// The requested revision does not resolve to a commit
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// The branch has no commits to analyze
    #[error("no commits to analyze")]
    EmptyHistory,

    /// Invalid glob pattern
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    /// A cache payload failed structural or semantic validation
    #[error("invalid cache entry: {0}")]
    Validation(#[from] ValidationError),

    /// The claimed head commit could not be confirmed upstream
    #[error("freshness check failed: {0}")]
    Freshness(String),

    /// A payload exceeded a configured size ceiling
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// HTTP transport or unexpected status
    #[error("http error: {0}")]
    Http(String),

    /// The run was cancelled by the caller
    #[error("analysis cancelled")]
    Cancelled,

    /// The analysis worker died without reporting a result
    #[error("analysis worker failed: {0}")]
    Worker(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for LoctrailError {
    fn from(err: reqwest::Error) -> Self {
        LoctrailError::Http(err.to_string())
    }
}
