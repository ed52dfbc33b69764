//! Error types for request dispatch and UDP listeners.
//!
//! [`Error`] is the single error type handed to listeners and returned from
//! synchronous validation. It is `Clone` so the same failure can be moved into
//! a marshaled callback without re-boxing the source.
//!
//! ## Error Cases
//! - `InvalidArgument`: malformed or missing input (empty host, bad URL).
//! - `NoConnectivity`: the connectivity gate reported no network path.
//! - `Transport`: the HTTP transport failed or returned an unreadable body.
//! - `Socket`: a UDP open, connect, send, or receive failed.
//! - `InvalidState`: a collaborator is missing or cannot answer.
//! - `PoolShutdown`: work was submitted to a pool that no longer accepts it.

use std::io;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatcher and the UDP connection manager.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The caller supplied input that can never succeed.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// No active network connection at dispatch time.
    #[error("No active network connection")]
    NoConnectivity,

    /// The transport failed before a usable response was produced.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// A UDP socket operation failed.
    #[error("Socket error ({kind}): {context}")]
    Socket { kind: io::ErrorKind, context: String },

    /// A collaborator was missing or queried outside its environment.
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    /// The worker pool has been replaced or shut down.
    #[error("Worker pool is shut down")]
    PoolShutdown,
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
        }
    }

    pub(crate) fn socket(err: &io::Error, context: &str) -> Self {
        Self::Socket {
            kind: err.kind(),
            context: format!("{context}: {err}"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::transport(format!("connection failed: {err}"))
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::transport(format!("malformed response body: {err}"))
    }
}
