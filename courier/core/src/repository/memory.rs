//! In-memory repository
//!
//! Keeps everything in process. Useful for tests and for running the chat
//! without a backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::{AuthSession, ChatRepository, RepositoryError, RepositoryResult, Role};
use crate::conversation::{sort_by_recent, Conversation};
use crate::messages::{ConversationId, Message, MessageId, NewMessage, UserId};

struct StoredConversation {
    owner: UserId,
    record: Conversation,
}

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `list_conversations`
    ListConversations,
    /// `create_conversation`
    CreateConversation,
    /// `update_conversation_title`
    UpdateTitle,
    /// `list_messages`
    ListMessages,
    /// `insert_message`
    InsertMessage,
}

struct StoredMessage {
    conversation_id: ConversationId,
    record: Message,
}

#[derive(Default)]
struct Inner {
    session: Option<AuthSession>,
    roles: HashSet<(UserId, Role)>,
    conversations: HashMap<ConversationId, StoredConversation>,
    /// Insertion order is creation order
    messages: Vec<StoredMessage>,
    /// Remaining writes before failing (`None` = unlimited)
    write_budget: Option<usize>,
    failing: HashSet<Operation>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing timestamps, so ordering is stable in fast tests
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn check(&self, op: Operation) -> RepositoryResult<()> {
        if self.failing.contains(&op) {
            return Err(RepositoryError::Unavailable(format!("{op:?} is failing")));
        }
        Ok(())
    }

    fn take_write(&mut self) -> RepositoryResult<()> {
        match self.write_budget {
            Some(0) => Err(RepositoryError::Unavailable("writes are disabled".to_string())),
            Some(ref mut remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn touch(&mut self, id: &ConversationId) -> RepositoryResult<()> {
        let now = self.next_timestamp();
        let stored = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {id}")))?;
        stored.record.updated_at = now;
        Ok(())
    }
}

/// Process-local [`ChatRepository`]
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRepository {
    /// Create an empty repository with nobody signed in
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with `user` signed in
    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        let repo = Self::new();
        repo.sign_in(user);
        repo
    }

    /// Sign a user in
    pub fn sign_in(&self, user: UserId) {
        let token = format!("local-{user}");
        self.inner.lock().session = Some(AuthSession::new(user, token));
    }

    /// Sign the current user out
    pub fn sign_out(&self) {
        self.inner.lock().session = None;
    }

    /// Grant a role
    pub fn grant_role(&self, user: UserId, role: Role) {
        self.inner.lock().roles.insert((user, role));
    }

    /// Allow only `writes` more writes, then fail every write
    ///
    /// `None` lifts the limit.
    pub fn set_write_budget(&self, writes: Option<usize>) {
        self.inner.lock().write_budget = writes;
    }

    /// Make every call of `op` fail until [`recover`](Self::recover)
    pub fn fail(&self, op: Operation) {
        self.inner.lock().failing.insert(op);
    }

    /// Let `op` succeed again
    pub fn recover(&self, op: Operation) {
        self.inner.lock().failing.remove(&op);
    }

    /// Number of stored messages across all conversations
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }
}

#[async_trait]
impl ChatRepository for InMemoryRepository {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn current_session(&self) -> RepositoryResult<Option<AuthSession>> {
        Ok(self.inner.lock().session.clone())
    }

    async fn has_role(&self, user: &UserId, role: Role) -> RepositoryResult<bool> {
        Ok(self.inner.lock().roles.contains(&(user.clone(), role)))
    }

    async fn list_conversations(&self) -> RepositoryResult<Vec<Conversation>> {
        let inner = self.inner.lock();
        inner.check(Operation::ListConversations)?;
        let owner = inner.session.as_ref().map(|s| &s.user_id);

        let mut list: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| owner.map_or(true, |o| &c.owner == o))
            .map(|c| c.record.clone())
            .collect();
        sort_by_recent(&mut list);
        Ok(list)
    }

    async fn create_conversation(
        &self,
        user: &UserId,
        title: &str,
    ) -> RepositoryResult<Conversation> {
        let mut inner = self.inner.lock();
        inner.check(Operation::CreateConversation)?;
        inner.take_write()?;

        let record = Conversation::new(ConversationId::generate(), title, inner.next_timestamp());
        inner.conversations.insert(
            record.id.clone(),
            StoredConversation {
                owner: user.clone(),
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn update_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.lock();
        inner.check(Operation::UpdateTitle)?;
        inner.take_write()?;

        inner.touch(id)?;
        if let Some(stored) = inner.conversations.get_mut(id) {
            stored.record.title = title.to_string();
        }
        Ok(())
    }

    async fn list_messages(&self, conversation: &ConversationId) -> RepositoryResult<Vec<Message>> {
        let inner = self.inner.lock();
        inner.check(Operation::ListMessages)?;
        Ok(inner
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation)
            .map(|m| m.record.clone())
            .collect())
    }

    async fn insert_message(&self, message: &NewMessage) -> RepositoryResult<Message> {
        let mut inner = self.inner.lock();
        inner.check(Operation::InsertMessage)?;
        inner.take_write()?;

        inner.touch(&message.conversation_id)?;
        let record = Message::new(MessageId::generate(), message.role, message.content.clone());
        inner.messages.push(StoredMessage {
            conversation_id: message.conversation_id.clone(),
            record: record.clone(),
        });
        Ok(record)
    }
}
