//! Error taxonomy for the monitoring core
//!
//! - [`CollectionError`]: a single source failed to produce a sample. Recovered
//!   locally: the source is marked degraded and retried on its next cycle.
//! - [`ConfigurationError`]: the configuration cannot be turned into a running
//!   engine. Fatal at startup.
//! - [`EvaluationError`]: the evaluator was handed data it cannot reason about.
//!   This indicates a bug in a source and is surfaced in the report and logs.

use std::time::Duration;

/// Errors that can occur while sampling a source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    #[error("sampling timed out after {0:?}")]
    Timeout(Duration),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for CollectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured duration on the error
            return CollectionError::Timeout(Duration::ZERO);
        }

        if let Some(status) = err.status()
            && matches!(status.as_u16(), 401 | 403)
        {
            return CollectionError::PermissionDenied(status.to_string());
        }

        if err.is_decode() {
            return CollectionError::InvalidResponse(err.to_string());
        }

        CollectionError::Unreachable(err.to_string())
    }
}

/// Errors detected while validating configuration or building the engine
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Parse(String),

    #[error("unknown profile `{0}`")]
    UnknownProfile(String),

    #[error("profile defines no sources")]
    NoSources,

    #[error("interval for `{0}` must be greater than zero")]
    ZeroInterval(String),

    #[error("timeout for source `{0}` must be greater than zero")]
    ZeroTimeout(String),

    #[error("retry policy for source `{0}` needs at least one attempt")]
    ZeroAttempts(String),

    #[error("threshold for `{metric}` is invalid: {reason}")]
    InvalidThreshold { metric: String, reason: String },

    #[error("source `{0}` requires an endpoint")]
    MissingEndpoint(String),

    #[error("source `{source_id}` has an invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint {
        source_id: String,
        endpoint: String,
        reason: String,
    },

    #[error("source `{0}` declares no metrics")]
    NoMetrics(String),

    #[error("duplicate source id `{0}`")]
    DuplicateSource(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Errors raised by the threshold evaluator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("metric `{metric}` has non-finite value {value}")]
    NonFiniteValue { metric: String, value: f64 },
}

/// Errors raised when managing sources at runtime
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("source `{0}` is already scheduled")]
    DuplicateSource(String),

    #[error("no source with id `{0}`")]
    UnknownSource(String),

    #[error("source `{source_id}` cannot be scheduled: {reason}")]
    InvalidSource { source_id: String, reason: String },

    #[error("scheduler has been stopped")]
    Stopped,
}
