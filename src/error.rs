//! Error types for gsc.
//!
//! | Error             | Where it surfaces                                 |
//! |-------------------|---------------------------------------------------|
//! | Validation        | before the pipeline starts, exit code 2           |
//! | Config            | before the pipeline starts, exit code 2           |
//! | Remote            | on the event stream, exit code 1                  |
//! | RateLimitExceeded | never; the limiter sleeps and retries             |

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::models::ScopeId;

/// Result type for gsc operations.
pub type Result<T> = std::result::Result<T, GscError>;

/// Top-level error of a gsc invocation.
#[derive(Debug, Error)]
pub enum GscError {
    /// Bad CLI input, detected before any network call.
    #[error("{0}")]
    Validation(String),

    /// Missing or broken environment configuration.
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GscError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            GscError::Validation(_) | GscError::Config(_) => 2,
            GscError::Remote(_) | GscError::Io(_) => 1,
        }
    }
}

/// Failure of an HTTP call against GitLab or GitHub.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Scope the failing call belonged to, when known.
    pub scope_id: Option<ScopeId>,
    /// HTTP status, absent for transport and decoding failures.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn transport(url: &str, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("Request to {} timed out", url)
        } else {
            format!("Request to {} failed: {}", url, err)
        };
        Self {
            scope_id: None,
            status: None,
            message,
        }
    }

    pub fn status(url: &str, status: reqwest::StatusCode) -> Self {
        Self {
            scope_id: None,
            status: Some(status.as_u16()),
            message: format!("{} for url: {}", status, url),
        }
    }

    pub fn unexpected(context: &str, detail: impl std::fmt::Display) -> Self {
        Self {
            scope_id: None,
            status: None,
            message: format!("Unexpected response from {}: {}", context, detail),
        }
    }

    /// Attach the scope the failing call was made for.
    pub fn with_scope(mut self, scope_id: &ScopeId) -> Self {
        self.scope_id = Some(scope_id.clone());
        self
    }
}

/// Raised by [`crate::rate_limit::RateLimiter::try_acquire`] when the window is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Too many calls, window resets in {period_remaining:?}")]
pub struct RateLimitExceeded {
    pub period_remaining: Duration,
}
