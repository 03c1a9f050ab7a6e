//! Conversations
//!
//! Conversation records and title derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::ConversationId;

/// Title given to a conversation before its first message
pub const DEFAULT_TITLE: &str = "Nova Conversa";

/// Maximum number of characters kept from the first message
pub const TITLE_MAX_CHARS: usize = 50;

const ELLIPSIS: &str = "...";

/// A conversation as listed in the sidebar
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id
    pub id: ConversationId,
    /// Display title
    pub title: String,
    /// Last activity
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation record
    pub fn new(id: ConversationId, title: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            updated_at,
        }
    }
}

/// Derive a conversation title from its first user message
///
/// Keeps the first `max_chars` characters and appends `...` only when
/// something was cut off.
#[must_use]
pub fn derive_title(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}

/// Sort conversations most recently updated first
pub fn sort_by_recent(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
