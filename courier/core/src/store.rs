//! Conversation State Store
//!
//! Holds the chat state rendered by a surface: the conversation list, the
//! selected conversation, its messages and the streaming flag.
//!
//! # Snapshots
//!
//! State is never mutated in place where a reader could see it. Every
//! operation builds a new [`ChatSnapshot`] and publishes it through a
//! `tokio::sync::watch` channel. Surfaces hold `Arc` snapshots and re-render
//! when the channel changes. All mutators take `&mut self`, so there is
//! exactly one writer.
//!
//! # Draft Lifecycle
//!
//! ```text
//!   begin_assistant_draft ──▶ apply_delta* ──▶ finalize_assistant
//!                                  │
//!                                  └──────────▶ discard_draft
//! ```
//!
//! At most one draft (id [`MessageId::DRAFT`]) exists at a time.

use std::sync::Arc;

use tokio::sync::watch;

use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::messages::{ConversationId, Message, MessageId};

/// Immutable view of the chat state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Conversations, most recent first
    pub conversations: Arc<Vec<Conversation>>,
    /// Selected conversation
    pub current_conversation: Option<ConversationId>,
    /// Messages of the selected conversation, oldest first
    pub messages: Arc<Vec<Message>>,
    /// A response is streaming; input should be disabled
    pub streaming: bool,
    /// The signed-in user holds the admin role
    pub is_admin: bool,
}

impl ChatSnapshot {
    /// The in-flight assistant draft, if any
    #[must_use]
    pub fn draft(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_draft())
    }

    /// Whether a draft exists
    #[must_use]
    pub fn has_draft(&self) -> bool {
        self.draft().is_some()
    }

    /// Number of messages, draft included
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The selected conversation's record
    #[must_use]
    pub fn current(&self) -> Option<&Conversation> {
        let id = self.current_conversation.as_ref()?;
        self.conversations.iter().find(|c| &c.id == id)
    }
}

/// Single-writer store publishing [`ChatSnapshot`]s
#[derive(Debug)]
pub struct ConversationStore {
    tx: watch::Sender<Arc<ChatSnapshot>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ChatSnapshot::default()));
        Self { tx }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChatSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receive every published snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatSnapshot>> {
        self.tx.subscribe()
    }

    fn publish(&mut self, next: ChatSnapshot) {
        self.tx.send_replace(Arc::new(next));
    }

    /// Build the next snapshot from a copy of the current one
    fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ChatSnapshot),
    {
        let mut next = (*self.snapshot()).clone();
        f(&mut next);
        self.publish(next);
    }

    /// Build a new message list and publish it
    fn update_messages<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Vec<Message>),
    {
        self.update(|snap| {
            let mut messages = (*snap.messages).clone();
            f(&mut messages);
            snap.messages = Arc::new(messages);
        });
    }

    /// Append a durable message at the tail
    pub fn push_message(&mut self, message: Message) {
        self.update_messages(|messages| messages.push(message));
    }

    /// Insert the assistant placeholder at the tail
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::DraftInProgress`] if a draft already exists.
    pub fn begin_assistant_draft(&mut self) -> Result<(), ChatError> {
        if self.snapshot().has_draft() {
            return Err(ChatError::DraftInProgress);
        }
        self.update_messages(|messages| messages.push(Message::draft()));
        tracing::debug!("Assistant draft started");
        Ok(())
    }

    /// Replace the draft's content with `previous + text`
    ///
    /// Returns `false` when there is no draft.
    pub fn apply_delta(&mut self, text: &str) -> bool {
        let snapshot = self.snapshot();
        let Some(index) = snapshot.messages.iter().position(Message::is_draft) else {
            return false;
        };

        self.update_messages(|messages| {
            let draft = &mut messages[index];
            let mut content = String::with_capacity(draft.content.len() + text.len());
            content.push_str(&draft.content);
            content.push_str(text);
            draft.content = content;
        });
        true
    }

    /// Swap the draft for the persisted record
    ///
    /// No-op returning `false` if there is no draft.
    pub fn finalize_assistant(&mut self, persisted: Message) -> bool {
        let snapshot = self.snapshot();
        let Some(index) = snapshot.messages.iter().position(Message::is_draft) else {
            tracing::debug!(id = %persisted.id, "No draft to finalize");
            return false;
        };

        let id = persisted.id.clone();
        self.update_messages(|messages| messages[index] = persisted);
        tracing::debug!(%id, "Assistant draft finalized");
        true
    }

    /// Remove the draft after a failed stream
    ///
    /// Returns `false` if there was no draft.
    pub fn discard_draft(&mut self) -> bool {
        if !self.snapshot().has_draft() {
            return false;
        }
        self.update_messages(|messages| messages.retain(|m| !m.is_draft()));
        tracing::debug!("Assistant draft discarded");
        true
    }

    /// Replace the conversation list
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        self.update(|snap| snap.conversations = Arc::new(conversations));
    }

    /// Put a new conversation at the head of the list
    pub fn prepend_conversation(&mut self, conversation: Conversation) {
        self.update(|snap| {
            let mut list = Vec::with_capacity(snap.conversations.len() + 1);
            list.push(conversation);
            list.extend(snap.conversations.iter().cloned());
            snap.conversations = Arc::new(list);
        });
    }

    /// Select a conversation
    pub fn set_current_conversation(&mut self, id: Option<ConversationId>) {
        self.update(|snap| snap.current_conversation = id);
    }

    /// Replace the message list
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.update(|snap| snap.messages = Arc::new(messages));
    }

    /// Set the streaming flag
    pub fn set_streaming(&mut self, streaming: bool) {
        self.update(|snap| snap.streaming = streaming);
    }

    /// Record whether the user is an admin
    pub fn set_admin(&mut self, is_admin: bool) {
        self.update(|snap| snap.is_admin = is_admin);
    }

    /// Durable messages of the selected conversation (draft excluded)
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.snapshot()
            .messages
            .iter()
            .filter(|m| !m.id.is_draft())
            .cloned()
            .collect()
    }

    /// Whether a message with this id is in the list
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.snapshot().messages.iter().any(|m| &m.id == id)
    }
}
