//! Persistence Collaborator
//!
//! The chat state lives in an external backend (auth plus relational tables).
//! This module defines the operations the chat needs from it and ships two
//! implementations:
//!
//! - [`InMemoryRepository`]: process-local, for tests and offline work
//! - [`RestRepository`]: PostgREST tables and GoTrue auth over HTTPS
//!
//! Schema ownership stays with the backend; only the columns the chat reads
//! or writes appear here.

mod memory;
mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::Conversation;
use crate::messages::{ConversationId, Message, NewMessage, UserId};

pub use memory::{InMemoryRepository, Operation};
pub use rest::RestRepository;

/// Errors returned by the persistence collaborator
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The request never got a response
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The backend rejected the request
    #[error("backend returned {status}: {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Error body
        message: String,
    },

    /// The response did not have the expected shape
    #[error("unexpected backend response: {0}")]
    Decode(String),

    /// The referenced record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// The backend refuses writes
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RepositoryError::Decode(err.to_string())
        } else {
            RepositoryError::Transport(err.to_string())
        }
    }
}

/// Result alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A signed-in user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSession {
    /// The user's id
    pub user_id: UserId,
    /// Token presented to the backend
    pub access_token: String,
}

impl AuthSession {
    /// Create a session
    pub fn new(user_id: UserId, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
        }
    }
}

/// Roles stored in `user_roles`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Administrator
    Admin,
    /// Regular user
    User,
}

impl Role {
    /// Column value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

/// Operations the chat needs from the backend
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// The signed-in user, if any
    async fn current_session(&self) -> RepositoryResult<Option<AuthSession>>;

    /// Whether `user` holds `role`
    async fn has_role(&self, user: &UserId, role: Role) -> RepositoryResult<bool>;

    /// The user's conversations, most recently updated first
    async fn list_conversations(&self) -> RepositoryResult<Vec<Conversation>>;

    /// Create a conversation owned by `user`
    async fn create_conversation(&self, user: &UserId, title: &str)
        -> RepositoryResult<Conversation>;

    /// Set a conversation's title
    async fn update_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> RepositoryResult<()>;

    /// Messages of a conversation, oldest first
    async fn list_messages(&self, conversation: &ConversationId) -> RepositoryResult<Vec<Message>>;

    /// Persist a message and return the stored record
    async fn insert_message(&self, message: &NewMessage) -> RepositoryResult<Message>;
}
