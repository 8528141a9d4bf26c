//! Error taxonomy for the parse service client.

use thiserror::Error;

use crate::retry::RetryableError;

/// Errors surfaced by the parse service client and the workers driving it.
#[derive(Debug, Error)]
pub enum ParseServiceError {
    /// The submit endpoint rejected the upload with a non-2xx status.
    #[error("task submit rejected with HTTP {status}: {body}")]
    Submit { status: u16, body: String },

    /// A status or data request answered with a non-2xx status.
    #[error("task endpoint answered HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The service ran the task and reported it failed; the input is bad
    /// or the run broke, retrying will not help.
    #[error("parse task failed: {0}")]
    Task(String),

    /// The polling loop exceeded its overall deadline, or an individual
    /// attempt timed out.
    #[error("timed out waiting for parse task")]
    Timeout,

    /// The ingestion was cancelled.
    #[error("parse cancelled")]
    Cancelled,

    /// Transport-level failure talking to the service.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with a payload we could not interpret.
    #[error("malformed service payload: {0}")]
    Decode(String),

    /// Worker-side failure that is not attributable to the service.
    #[error("internal parse failure: {0}")]
    Internal(String),
}

impl RetryableError for ParseServiceError {
    fn is_retryable(&self) -> bool {
        match self {
            // 5xx and the two transient 4xx statuses are worth retrying.
            Self::Submit { status, .. } | Self::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Network(_) | Self::Timeout => true,
            Self::Task(_) | Self::Cancelled | Self::Decode(_) | Self::Internal(_) => false,
        }
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }

    fn attempt_timeout() -> Self {
        Self::Timeout
    }
}
