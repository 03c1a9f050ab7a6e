//! Chat Controller
//!
//! The single writer of the chat state. It owns the [`ConversationStore`],
//! talks to the persistence collaborator and the chat endpoint, and reports
//! user-visible failures as [`Notice`]s.
//!
//! # Sending a Message
//!
//! ```text
//!   send_message("Hello")
//!     │
//!     ├─ no conversation selected? ──▶ create one, use its id
//!     ├─ persist user message ──────▶ push to store
//!     ├─ still untitled? ───────────▶ persist derived title, reload list
//!     │                                 (failure only warns)
//!     ├─ begin draft ("temp")
//!     ├─ open stream ───────────────▶ apply each delta to the draft
//!     ├─ persist assistant message
//!     └─ finalize draft with the durable record
//!
//!   any failure ──▶ discard draft, error notice, return the error
//! ```
//!
//! The streaming flag is set for the whole exchange and always cleared on
//! return.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::access::{require_session, Access};
use crate::config::ChatSettings;
use crate::conversation::{derive_title, Conversation};
use crate::endpoint::{ChatEndpoint, ChatRequest};
use crate::error::ChatError;
use crate::messages::{
    ConversationId, Message, MessageId, MessageRole, NewMessage, Notice, NotifyLevel,
};
use crate::repository::{AuthSession, ChatRepository, Role};
use crate::store::{ChatSnapshot, ConversationStore};
use crate::streaming::{consume_stream, SseDecoder};

/// Orchestrates persistence, streaming and reconciliation for one user
pub struct ChatController<R: ?Sized, E: ?Sized> {
    repo: Arc<R>,
    endpoint: Arc<E>,
    store: ConversationStore,
    settings: ChatSettings,
    session: Option<AuthSession>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl<R, E> ChatController<R, E>
where
    R: ChatRepository + ?Sized,
    E: ChatEndpoint + ?Sized,
{
    /// Create a controller and the receiver for its notices
    pub fn new(
        repo: Arc<R>,
        endpoint: Arc<E>,
        settings: ChatSettings,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let controller = Self {
            repo,
            endpoint,
            store: ConversationStore::new(),
            settings,
            session: None,
            notices,
        };
        (controller, notice_rx)
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChatSnapshot> {
        self.store.snapshot()
    }

    /// Receive every published snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatSnapshot>> {
        self.store.subscribe()
    }

    /// The session recorded by [`initialize`](Self::initialize)
    #[must_use]
    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine
        let _ = self.notices.send(notice);
    }

    /// Log, notify and hand back the error
    fn report(&self, context: &str, err: impl Into<ChatError>) -> ChatError {
        let err = err.into();
        tracing::warn!(error = %err, "{context}");
        self.notify(Notice::error(context));
        err
    }

    /// Check the session, record the admin flag and load conversations
    ///
    /// A missing session is returned as [`Access::Denied`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    pub async fn initialize(&mut self) -> Result<Access, ChatError> {
        let access = require_session(self.repo.as_ref())
            .await
            .map_err(|e| self.report("Erro ao verificar autenticação", e))?;

        let Access::Granted(ref session) = access else {
            self.session = None;
            return Ok(access);
        };

        let is_admin = self
            .repo
            .has_role(&session.user_id, Role::Admin)
            .await
            .map_err(|e| self.report("Erro ao verificar autenticação", e))?;

        tracing::info!(
            user = %session.user_id,
            is_admin,
            backend = self.repo.name(),
            "Chat session started"
        );
        self.session = Some(session.clone());
        self.store.set_admin(is_admin);
        self.load_conversations().await?;
        Ok(access)
    }

    /// Nothing is published unless every read succeeds
    async fn fetch_conversations(&mut self) -> Result<(), ChatError> {
        let conversations = self.repo.list_conversations().await?;
        tracing::debug!(count = conversations.len(), "Loaded conversations");

        let initial = match conversations.first() {
            Some(first) if self.store.snapshot().current_conversation.is_none() => {
                let messages = self.repo.list_messages(&first.id).await?;
                Some((first.id.clone(), messages))
            }
            _ => None,
        };

        self.store.set_conversations(conversations);
        if let Some((id, messages)) = initial {
            tracing::debug!(conversation = %id, count = messages.len(), "Loaded messages");
            self.store.set_current_conversation(Some(id));
            self.store.set_messages(messages);
        }
        Ok(())
    }

    async fn fetch_messages(&mut self, id: ConversationId) -> Result<(), ChatError> {
        let messages = self.repo.list_messages(&id).await?;
        tracing::debug!(conversation = %id, count = messages.len(), "Loaded messages");
        self.store.set_current_conversation(Some(id));
        self.store.set_messages(messages);
        Ok(())
    }

    /// Reload the conversation list, most recent first
    ///
    /// Selects the first conversation when none is selected.
    ///
    /// # Errors
    ///
    /// Returns the repository failure after emitting an error notice.
    pub async fn load_conversations(&mut self) -> Result<(), ChatError> {
        self.fetch_conversations()
            .await
            .map_err(|e| self.report("Erro ao carregar conversas", e))
    }

    /// Select a conversation and load its messages, oldest first
    ///
    /// On failure the previous selection is kept.
    ///
    /// # Errors
    ///
    /// Returns the repository failure after emitting an error notice.
    pub async fn select_conversation(&mut self, id: ConversationId) -> Result<(), ChatError> {
        self.fetch_messages(id)
            .await
            .map_err(|e| self.report("Erro ao carregar mensagens", e))
    }

    async fn open_conversation(&mut self) -> Result<Conversation, ChatError> {
        let user = self
            .session
            .as_ref()
            .map(|s| s.user_id.clone())
            .ok_or(ChatError::NoSession)?;

        let conversation = self
            .repo
            .create_conversation(&user, &self.settings.default_title)
            .await?;

        tracing::info!(conversation = %conversation.id, "Conversation created");
        self.store.prepend_conversation(conversation.clone());
        self.store.set_current_conversation(Some(conversation.id.clone()));
        self.store.set_messages(Vec::new());
        self.notify(Notice::success("Nova conversa criada"));
        Ok(conversation)
    }

    /// Create an empty conversation with the default title and select it
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NoSession`] before [`initialize`](Self::initialize)
    /// granted access, or the repository failure.
    pub async fn create_conversation(&mut self) -> Result<Conversation, ChatError> {
        self.open_conversation()
            .await
            .map_err(|e| self.report("Erro ao criar conversa", e))
    }

    /// Persist a user message and append it to the list
    ///
    /// # Errors
    ///
    /// Returns the repository failure; the list is left unchanged.
    pub async fn append_user_message(
        &mut self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<MessageId, ChatError> {
        let new = NewMessage::new(conversation_id.clone(), MessageRole::User, content);
        let message = self.repo.insert_message(&new).await?;
        let id = message.id.clone();
        self.store.push_message(message);
        Ok(id)
    }

    /// Send a user message and stream the assistant's reply into the list
    ///
    /// Input is trimmed; empty input is ignored and returns `Ok(None)`.
    /// Returns the persisted assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::StreamInProgress`] while another reply is
    /// streaming. Any other failure discards the draft, emits an error
    /// notice and is returned.
    pub async fn send_message(&mut self, content: &str) -> Result<Option<Message>, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        if self.store.snapshot().streaming {
            return Err(ChatError::StreamInProgress);
        }

        self.store.set_streaming(true);
        let result = self.exchange(content).await;
        self.store.set_streaming(false);

        match result {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                if self.store.discard_draft() {
                    tracing::debug!("Removed assistant draft after failure");
                }
                tracing::warn!(error = %err, "Failed to send message");
                self.notify(Notice::error(format!("Erro ao enviar mensagem: {err}")));
                Err(err)
            }
        }
    }

    /// Persist the derived title and reload the list
    ///
    /// A failed title write is only a warning: the reply still streams, and
    /// the next send tries again.
    async fn assign_title(
        &mut self,
        conversation_id: &ConversationId,
        first_message: &str,
    ) -> Result<(), ChatError> {
        let title = derive_title(first_message, self.settings.title_max_chars);
        match self
            .repo
            .update_conversation_title(conversation_id, &title)
            .await
        {
            Ok(()) => {
                tracing::debug!(conversation = %conversation_id, %title, "Conversation titled");
                self.fetch_conversations().await
            }
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    error = %e,
                    "Failed to set conversation title"
                );
                self.notify(Notice::new(
                    NotifyLevel::Warning,
                    "Erro ao definir o título da conversa",
                ));
                Ok(())
            }
        }
    }

    async fn exchange(&mut self, content: &str) -> Result<Message, ChatError> {
        let selected = self.store.snapshot().current_conversation.clone();
        let conversation_id = match selected {
            Some(id) => id,
            None => self.open_conversation().await?.id,
        };

        let history = self.store.history();
        let untitled = history.is_empty()
            || self
                .store
                .snapshot()
                .current()
                .is_some_and(|c| c.title == self.settings.default_title);

        self.append_user_message(&conversation_id, content).await?;

        if untitled {
            // Earlier title writes may have failed; the title still comes
            // from the first user message
            let first = history
                .iter()
                .find(|m| m.role == MessageRole::User)
                .map_or(content, |m| m.content.as_str());
            self.assign_title(&conversation_id, first).await?;
        }

        let request = ChatRequest::new(&history, content, conversation_id.clone());
        self.store.begin_assistant_draft()?;

        let body = self.endpoint.open_stream(&request).await?;
        let mut decoder = SseDecoder::with_max_buffer(self.settings.max_buffer_bytes);
        let outcome = consume_stream(body, &mut decoder, |delta| {
            self.store.apply_delta(delta);
        })
        .await?;

        tracing::debug!(
            endpoint = self.endpoint.name(),
            deltas = outcome.deltas,
            finished_by = ?outcome.finished_by,
            "Assistant reply received"
        );

        let persisted = self
            .repo
            .insert_message(&NewMessage::new(
                conversation_id,
                MessageRole::Assistant,
                outcome.content,
            ))
            .await?;
        self.store.finalize_assistant(persisted.clone());
        Ok(persisted)
    }
}
