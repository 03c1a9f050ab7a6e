//! Courier Core - Streaming Chat for the Courier Delivery Assistant
//!
//! This crate holds the chat logic behind the courier assistant, independent
//! of any UI. A surface (the terminal client, a web page, a test) drives the
//! [`ChatController`] and renders the [`ChatSnapshot`]s it publishes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Surfaces                              │
//! │        courier-chat (terminal)        tests / headless         │
//! │                 │   ▲                        │   ▲             │
//! │     send_message│   │watch<Arc<ChatSnapshot>>│   │Notice       │
//! └─────────────────┼───┼────────────────────────┼───┼─────────────┘
//!                   ▼   │                        ▼   │
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       ChatController                           │
//! │  ┌─────────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │ConversationStore│  │  SseDecoder   │  │ ChatRepository   │  │
//! │  │ (single writer) │◀─│ consume_stream│  │ (REST/in-memory) │  │
//! │  └─────────────────┘  └───────▲───────┘  └──────────────────┘  │
//! │                               │ bytes                          │
//! │                       ┌───────┴───────┐                        │
//! │                       │ ChatEndpoint  │                        │
//! │                       │ (HTTP stream) │                        │
//! │                       └───────────────┘                        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatController`]: orchestrates a user's conversations and replies
//! - [`ConversationStore`]: publishes immutable [`ChatSnapshot`]s
//! - [`SseDecoder`]: turns chunked `data: ` records into text deltas
//! - [`ChatRepository`]: persistence and auth collaborator
//! - [`ChatEndpoint`]: the remote function producing streamed replies
//! - [`CourierConfig`]: layered configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier_core::{
//!     config::load_config, ChatController, HttpChatEndpoint, RestRepository,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let repo = Arc::new(RestRepository::new(&config.backend)?);
//!     let endpoint = Arc::new(HttpChatEndpoint::new(
//!         &config.backend,
//!         &config.chat.function_path,
//!     )?);
//!
//!     let (mut chat, mut notices) = ChatController::new(repo, endpoint, config.chat);
//!     chat.initialize().await?;
//!     chat.send_message("Onde está meu pedido?").await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod endpoint;
pub mod error;
pub mod messages;
pub mod repository;
pub mod store;
pub mod streaming;

pub use access::{require_admin, require_session, Access, DenialReason};
pub use chat::ChatController;
pub use config::{ConfigOverrides, ConfigSource, CourierConfig};
pub use conversation::{derive_title, Conversation, DEFAULT_TITLE};
pub use endpoint::{ByteStream, ChatEndpoint, ChatRequest, ChatTurn, HttpChatEndpoint};
pub use error::ChatError;
pub use messages::{
    ConversationId, Message, MessageId, MessageRole, NewMessage, Notice, NotifyLevel, UserId,
};
pub use repository::{
    AuthSession, ChatRepository, InMemoryRepository, RepositoryError, RestRepository, Role,
};
pub use store::{ChatSnapshot, ConversationStore};
pub use streaming::{consume_stream, SseDecoder, StreamEvent};
