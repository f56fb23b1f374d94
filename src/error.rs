//! Error types for lrc-runner
//!
//! This module provides the error taxonomy for the runner:
//! - Service/API errors carrying the HTTP status code when one was observed
//! - The three watchdog timeouts (stuck run state, report generation, download)
//! - Terminal run outcomes that carry no report
//! - Configuration and I/O errors from the CLI glue
//!
//! A `status_code` of 401 is the only code interpreted specially anywhere in
//! the crate; see [`Error::is_auth_error`].

use crate::types::DetailedStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for lrc-runner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lrc-runner
#[derive(Debug, Error)]
pub enum Error {
    /// Service API call failed. The message already carries the operation
    /// context ("running test failed: ..."); the status code is present when
    /// the service answered with a non-success HTTP status.
    #[error("{message}")]
    Api {
        /// Human-readable error message including the failed operation
        message: String,
        /// HTTP status code returned by the service, if any
        status_code: Option<u16>,
    },

    /// The run sat in a transitional state (INITIALIZING/STOPPING) longer
    /// than the stuck-state watchdog allows
    #[error("test run \"{status}\" time exceeds {}s", limit.as_secs())]
    StuckState {
        /// The detailed status the run was stuck in
        status: DetailedStatus,
        /// The watchdog limit that elapsed
        limit: Duration,
    },

    /// Report generation did not finish within the report watchdog limit
    #[error("create test run report ({report_id}) time exceeds {}s", limit.as_secs())]
    ReportTimeout {
        /// The report whose generation timed out
        report_id: i64,
        /// The watchdog limit that elapsed
        limit: Duration,
    },

    /// The report download did not finish within the download deadline
    #[error("download time exceeds {}s", limit.as_secs())]
    DownloadTimeout {
        /// The deadline that elapsed
        limit: Duration,
    },

    /// The run ended in a no-result state (SYSTEM_ERROR/HALTED/ABORTED)
    #[error("test run ended abnormally: {0}")]
    RunFailed(DetailedStatus),

    /// The run left its in-progress phase but termination was never
    /// confirmed within the retry budget, so no report can be produced
    #[error("no report available")]
    NoReport,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "tenant")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network transport error (connection refused, DNS, TLS, ...)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file is not valid YAML
    #[error("invalid configuration file: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create an API error without a status code
    pub fn api(message: impl Into<String>) -> Self {
        Error::Api {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error signals expired or missing authorization.
    ///
    /// Only an explicit 401 from the service qualifies. The HTML sign-in-page
    /// heuristic in the API client remaps that shape of response to a 401
    /// before it ever reaches callers, so this check covers both.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::Api {
                status_code: Some(401),
                ..
            }
        )
    }

    /// Prefix the message of an API error with operation context, keeping
    /// the error kind and status code untouched for everything else.
    pub(crate) fn with_operation(self, operation: &str) -> Self {
        match self {
            Error::Api {
                message,
                status_code,
            } => Error::Api {
                message: format!("{operation}: {message}"),
                status_code,
            },
            Error::Network(e) => Error::Api {
                message: format!("{operation}: {e}"),
                status_code: None,
            },
            other => other,
        }
    }
}
