//! Chat Endpoint
//!
//! The remote function that turns a conversation into a streamed assistant
//! reply. The request carries the full history plus the new user message; the
//! response body is a sequence of `data: ` records (see [`crate::streaming`]).
//!
//! The trait exists so the controller can be driven by a scripted stream in
//! tests and by [`HttpChatEndpoint`] in production.

mod http;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;

use crate::error::ChatError;
use crate::messages::{ConversationId, Message, MessageRole};

pub use http::HttpChatEndpoint;

/// Raw response body, chunked as it arrives
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// One turn of history sent to the endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    /// Who said it
    pub role: MessageRole,
    /// What was said
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of a chat request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// History in order, ending with the new user message
    pub messages: Vec<ChatTurn>,
    /// Conversation the reply belongs to
    pub conversation_id: ConversationId,
}

impl ChatRequest {
    /// Build a request from durable history and the new user message
    ///
    /// Draft messages in `history` are skipped.
    #[must_use]
    pub fn new(history: &[Message], user_message: &str, conversation_id: ConversationId) -> Self {
        let mut messages: Vec<ChatTurn> = history
            .iter()
            .filter(|m| !m.is_draft())
            .map(ChatTurn::from)
            .collect();
        messages.push(ChatTurn {
            role: MessageRole::User,
            content: user_message.to_string(),
        });

        Self {
            messages,
            conversation_id,
        }
    }
}

/// A remote function producing streamed assistant replies
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Endpoint name for logs
    fn name(&self) -> &str;

    /// Send `request` and return the response body
    ///
    /// Fails with [`ChatError::Http`] on a non-success status and with
    /// [`ChatError::Network`] when the connection cannot be made.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError>;
}
