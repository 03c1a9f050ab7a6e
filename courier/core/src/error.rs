//! Chat error types

use thiserror::Error;

use crate::repository::RepositoryError;

/// Errors raised while sending a message or streaming a response
#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat endpoint answered with a non-success status
    #[error("chat endpoint returned {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Connection failed or the body stream broke off
    #[error("network error: {0}")]
    Network(String),

    /// The persistence collaborator failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// `begin_assistant_draft` was called while a draft exists
    #[error("an assistant draft is already in progress")]
    DraftInProgress,

    /// A message was sent while a response is still streaming
    #[error("a response is already streaming")]
    StreamInProgress,

    /// No signed-in user
    #[error("no active session")]
    NoSession,

    /// The decoder buffered too much data without finding a record
    #[error("stream buffer exceeded {limit} bytes without a complete record")]
    BufferOverflow {
        /// Configured limit in bytes
        limit: usize,
    },
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            ChatError::Network(format!("connection failed: {err}"))
        } else {
            ChatError::Network(err.to_string())
        }
    }
}

impl ChatError {
    /// Whether the error came from the network or the endpoint
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatError::Http { .. } | ChatError::Network(_))
    }
}
