//! Error types for collection scanning.

use thiserror::Error;

/// Errors that can occur while scanning a collection.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote store could not be reached (connection refused, timeout,
    /// broken transfer). Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote store answered with a non-success status. Retryable.
    #[error("server error (status {status}): {message}")]
    Server {
        /// HTTP status code returned by the store.
        status: u16,
        /// Response body, truncated to a reasonable length.
        message: String,
    },

    /// The caller was interrupted. Never retried, propagated immediately.
    #[error("interrupted")]
    Interrupted,

    /// Invalid configuration or call parameters. Fails fast, never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The store returned a payload this client cannot interpret.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl Error {
    /// Whether a retry of the failed remote call may succeed.
    ///
    /// Only transport and server errors qualify; interruption and local
    /// errors are surfaced to the caller right away.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Server { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Decode(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}

/// Result type for scanner operations.
pub type Result<T> = std::result::Result<T, Error>;
