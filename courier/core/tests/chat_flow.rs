//! Integration tests for the chat controller
//!
//! These drive `ChatController` end to end with the in-memory repository and
//! a scripted endpoint that replays canned response bodies.
//! Tests cover:
//! - The send flow from user input to the finalized assistant message
//! - Title derivation on the first message
//! - Draft cleanup on endpoint, stream and persistence failures
//! - Conversation loading and selection

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use courier_core::config::ChatSettings;
use courier_core::repository::{Operation, RepositoryError};
use courier_core::{
    Access, ByteStream, ChatController, ChatEndpoint, ChatError, ChatRepository, ChatRequest,
    ConversationId, DenialReason, InMemoryRepository, MessageRole, NewMessage, Notice,
    NotifyLevel, Role, UserId,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// One canned reply
enum Reply {
    /// Body chunks, delivered in order
    Chunks(Vec<String>),
    /// Body chunks followed by a broken connection
    BreakAfter(Vec<String>),
    /// Non-success status
    Status(u16),
}

#[derive(Default)]
struct ScriptedEndpoint {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedEndpoint {
    fn with(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

fn body(chunks: Vec<String>) -> Vec<Result<Bytes, ChatError>> {
    chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect()
}

#[async_trait]
impl ChatEndpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        self.requests.lock().push(request.clone());
        let reply = self.replies.lock().pop_front();

        match reply {
            Some(Reply::Chunks(chunks)) => Ok(Box::pin(stream::iter(body(chunks)))),
            Some(Reply::BreakAfter(chunks)) => {
                let mut items = body(chunks);
                items.push(Err(ChatError::Network("connection reset".to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(Reply::Status(status)) => Err(ChatError::Http {
                status,
                body: "upstream failure".to_string(),
            }),
            None => Err(ChatError::Network("no scripted reply".to_string())),
        }
    }
}

fn delta(text: &str) -> String {
    let json = serde_json::json!({ "choices": [{ "delta": { "content": text } }] });
    format!("data: {json}\n\n")
}

fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

fn hello_reply() -> Reply {
    Reply::Chunks(vec![delta("Hel"), delta("lo"), done()])
}

fn alice() -> UserId {
    UserId::new("alice")
}

type Controller = ChatController<InMemoryRepository, ScriptedEndpoint>;

async fn signed_in_chat(
    replies: Vec<Reply>,
) -> (
    Controller,
    mpsc::UnboundedReceiver<Notice>,
    Arc<InMemoryRepository>,
    Arc<ScriptedEndpoint>,
) {
    let repo = Arc::new(InMemoryRepository::signed_in(alice()));
    let endpoint = ScriptedEndpoint::with(replies);
    let (mut chat, notices) =
        ChatController::new(Arc::clone(&repo), Arc::clone(&endpoint), ChatSettings::default());

    let access = chat.initialize().await.unwrap();
    assert!(matches!(access, Access::Granted(_)));
    (chat, notices, repo, endpoint)
}

fn drain(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut all = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        all.push(notice);
    }
    all
}

// =============================================================================
// Send Flow
// =============================================================================

#[tokio::test]
async fn test_hello_round_trip() {
    let (mut chat, mut notices, repo, endpoint) = signed_in_chat(vec![hello_reply()]).await;

    let reply = chat.send_message("Hello").await.unwrap().unwrap();
    assert_eq!(reply.content, "Hello");
    assert_eq!(reply.role, MessageRole::Assistant);
    assert!(!reply.id.is_draft());

    let snap = chat.snapshot();
    assert!(!snap.streaming);
    assert!(!snap.has_draft());
    let contents: Vec<_> = snap
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        contents,
        vec![(MessageRole::User, "Hello"), (MessageRole::Assistant, "Hello")]
    );
    assert_eq!(snap.messages[1], reply);
    assert_eq!(repo.message_count(), 2);

    // The conversation was created on demand and its id used for the request
    let current = snap.current().unwrap();
    assert_eq!(current.title, "Hello");
    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].conversation_id, current.id);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].content, "Hello");

    let notices = drain(&mut notices);
    assert_eq!(notices, vec![Notice::success("Nova conversa criada")]);
}

#[tokio::test]
async fn test_input_is_trimmed_and_empty_ignored() {
    let (mut chat, _notices, repo, endpoint) = signed_in_chat(vec![hello_reply()]).await;

    assert!(chat.send_message("   \n").await.unwrap().is_none());
    assert!(endpoint.requests().is_empty());
    assert_eq!(repo.message_count(), 0);
    assert!(chat.snapshot().current_conversation.is_none());

    chat.send_message("  Oi  ").await.unwrap();
    assert_eq!(chat.snapshot().messages[0].content, "Oi");
}

#[tokio::test]
async fn test_history_sent_with_follow_up() {
    let (mut chat, _notices, _repo, endpoint) = signed_in_chat(vec![
        hello_reply(),
        Reply::Chunks(vec![delta("Tudo bem"), done()]),
    ])
    .await;

    chat.send_message("Hello").await.unwrap();
    chat.send_message("Como vai?").await.unwrap();

    let second = &endpoint.requests()[1];
    let turns: Vec<_> = second
        .messages
        .iter()
        .map(|t| (t.role, t.content.as_str()))
        .collect();
    assert_eq!(
        turns,
        vec![
            (MessageRole::User, "Hello"),
            (MessageRole::Assistant, "Hello"),
            (MessageRole::User, "Como vai?"),
        ]
    );
    assert_eq!(chat.snapshot().message_count(), 4);
}

#[tokio::test]
async fn test_stream_without_done_still_finalizes() {
    let (mut chat, _notices, repo, _endpoint) =
        signed_in_chat(vec![Reply::Chunks(vec![delta("partial "), delta("answer")])]).await;

    let reply = chat.send_message("Hello").await.unwrap().unwrap();
    assert_eq!(reply.content, "partial answer");
    assert_eq!(repo.message_count(), 2);
}

#[tokio::test]
async fn test_chunk_boundaries_do_not_change_content() {
    let full = format!("{}: keepalive\n\n{}{}", delta("Olá, "), delta("mundo"), done());
    let split: Vec<String> = full.chars().map(String::from).collect();

    let (mut chat, _notices, _repo, _endpoint) =
        signed_in_chat(vec![Reply::Chunks(split)]).await;

    let reply = chat.send_message("Hello").await.unwrap().unwrap();
    assert_eq!(reply.content, "Olá, mundo");
}

// =============================================================================
// Titles
// =============================================================================

#[tokio::test]
async fn test_long_first_message_truncates_title() {
    let (mut chat, _notices, repo, _endpoint) = signed_in_chat(vec![hello_reply()]).await;

    let content = "x".repeat(60);
    chat.send_message(&content).await.unwrap();

    let expected = format!("{}...", "x".repeat(50));
    assert_eq!(chat.snapshot().current().unwrap().title, expected);
    assert_eq!(repo.list_conversations().await.unwrap()[0].title, expected);
}

#[tokio::test]
async fn test_fifty_char_title_unchanged() {
    let (mut chat, _notices, _repo, _endpoint) = signed_in_chat(vec![hello_reply()]).await;

    let content = "y".repeat(50);
    chat.send_message(&content).await.unwrap();
    assert_eq!(chat.snapshot().current().unwrap().title, content);
}

#[tokio::test]
async fn test_only_first_message_sets_title() {
    let (mut chat, _notices, _repo, _endpoint) =
        signed_in_chat(vec![hello_reply(), hello_reply()]).await;

    chat.send_message("Primeira pergunta").await.unwrap();
    chat.send_message("Segunda pergunta").await.unwrap();
    assert_eq!(chat.snapshot().current().unwrap().title, "Primeira pergunta");
}

#[tokio::test]
async fn test_title_failure_keeps_streaming_and_retries() {
    let (mut chat, mut notices, repo, endpoint) =
        signed_in_chat(vec![hello_reply(), hello_reply()]).await;
    chat.create_conversation().await.unwrap();
    drain(&mut notices);

    repo.fail(Operation::UpdateTitle);
    let reply = chat.send_message("Hello").await.unwrap().unwrap();
    assert_eq!(reply.content, "Hello");
    assert_eq!(endpoint.requests().len(), 1);
    assert_eq!(chat.snapshot().current().unwrap().title, "Nova Conversa");

    let notices = drain(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NotifyLevel::Warning);

    // The next send titles the conversation from its first message
    repo.recover(Operation::UpdateTitle);
    chat.send_message("Again").await.unwrap();
    assert_eq!(chat.snapshot().current().unwrap().title, "Hello");
    assert_eq!(repo.list_conversations().await.unwrap()[0].title, "Hello");
}

// =============================================================================
// Failure Handling
// =============================================================================

#[tokio::test]
async fn test_http_failure_removes_draft() {
    let (mut chat, mut notices, repo, _endpoint) =
        signed_in_chat(vec![Reply::Status(500)]).await;

    let err = chat.send_message("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Http { status: 500, .. }));

    // Back to the pre-stream count: only the user message remains
    let snap = chat.snapshot();
    assert_eq!(snap.message_count(), 1);
    assert!(!snap.has_draft());
    assert!(!snap.streaming);
    assert_eq!(repo.message_count(), 1);

    let errors: Vec<_> = drain(&mut notices)
        .into_iter()
        .filter(|n| n.level == NotifyLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("500"));
}

#[tokio::test]
async fn test_broken_stream_discards_partial_reply() {
    let (mut chat, mut notices, repo, _endpoint) =
        signed_in_chat(vec![Reply::BreakAfter(vec![delta("Hel")])]).await;

    let err = chat.send_message("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Network(_)));

    let snap = chat.snapshot();
    assert_eq!(snap.message_count(), 1);
    assert!(snap.messages.iter().all(|m| m.role == MessageRole::User));
    assert_eq!(repo.message_count(), 1);
    assert!(drain(&mut notices)
        .iter()
        .any(|n| n.level == NotifyLevel::Error));
}

#[tokio::test]
async fn test_assistant_persist_failure_discards_draft() {
    let (mut chat, _notices, repo, _endpoint) = signed_in_chat(vec![hello_reply()]).await;
    chat.create_conversation().await.unwrap();

    // User message and title update succeed, the assistant insert fails
    repo.set_write_budget(Some(2));
    let err = chat.send_message("Hello").await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::Repository(RepositoryError::Unavailable(_))
    ));

    let snap = chat.snapshot();
    assert!(!snap.has_draft());
    assert_eq!(snap.message_count(), 1);
    assert!(!snap.streaming);
}

#[tokio::test]
async fn test_user_persist_failure_leaves_list_unchanged() {
    let (mut chat, _notices, _repo, endpoint) = signed_in_chat(vec![hello_reply()]).await;
    chat.create_conversation().await.unwrap();
    chat.select_conversation(ConversationId::new("missing"))
        .await
        .unwrap();

    let err = chat.send_message("Hello").await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::Repository(RepositoryError::NotFound(_))
    ));
    assert_eq!(chat.snapshot().message_count(), 0);
    assert!(endpoint.requests().is_empty());
}

#[tokio::test]
async fn test_malformed_record_does_not_stall() {
    let (mut chat, _notices, _repo, _endpoint) = signed_in_chat(vec![Reply::Chunks(vec![
        "data: {not json}\n".to_string(),
        delta("still"),
        delta(" here"),
        done(),
    ])])
    .await;

    let reply = chat.send_message("Hello").await.unwrap().unwrap();
    assert_eq!(reply.content, "still here");
}

// =============================================================================
// Session and Conversations
// =============================================================================

#[tokio::test]
async fn test_no_session_is_denied() {
    let repo = Arc::new(InMemoryRepository::new());
    let endpoint = ScriptedEndpoint::with(vec![hello_reply()]);
    let (mut chat, mut notices) = ChatController::new(repo, endpoint, ChatSettings::default());

    let access = chat.initialize().await.unwrap();
    assert_eq!(access, Access::Denied(DenialReason::NoSession));
    assert!(chat.session().is_none());
    assert!(drain(&mut notices).is_empty());

    let err = chat.send_message("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::NoSession));
    assert_eq!(chat.snapshot().message_count(), 0);
}

#[tokio::test]
async fn test_admin_flag_recorded() {
    let repo = Arc::new(InMemoryRepository::signed_in(alice()));
    repo.grant_role(alice(), Role::Admin);
    let (mut chat, _notices) = ChatController::new(
        repo,
        ScriptedEndpoint::with(Vec::new()),
        ChatSettings::default(),
    );

    chat.initialize().await.unwrap();
    assert!(chat.snapshot().is_admin);
}

#[tokio::test]
async fn test_initialize_selects_most_recent_conversation() {
    let repo = Arc::new(InMemoryRepository::signed_in(alice()));
    let delivery = repo.create_conversation(&alice(), "Entrega").await.unwrap();
    let payment = repo.create_conversation(&alice(), "Pagamento").await.unwrap();
    for (role, text) in [(MessageRole::User, "Cadê?"), (MessageRole::Assistant, "A caminho")] {
        repo.insert_message(&NewMessage::new(delivery.id.clone(), role, text))
            .await
            .unwrap();
    }

    let (mut chat, _notices) = ChatController::new(
        Arc::clone(&repo),
        ScriptedEndpoint::with(Vec::new()),
        ChatSettings::default(),
    );
    chat.initialize().await.unwrap();

    let snap = chat.snapshot();
    let titles: Vec<_> = snap.conversations.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Entrega", "Pagamento"]);
    assert_eq!(snap.current_conversation, Some(delivery.id));
    let contents: Vec<_> = snap.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Cadê?", "A caminho"]);

    chat.select_conversation(payment.id.clone()).await.unwrap();
    let snap = chat.snapshot();
    assert_eq!(snap.current_conversation, Some(payment.id));
    assert_eq!(snap.message_count(), 0);
}

#[tokio::test]
async fn test_failed_message_load_publishes_nothing() {
    let repo = Arc::new(InMemoryRepository::signed_in(alice()));
    let delivery = repo.create_conversation(&alice(), "Entrega").await.unwrap();
    repo.insert_message(&NewMessage::new(delivery.id.clone(), MessageRole::User, "Cadê?"))
        .await
        .unwrap();
    repo.fail(Operation::ListMessages);

    let (mut chat, mut notices) = ChatController::new(
        Arc::clone(&repo),
        ScriptedEndpoint::with(Vec::new()),
        ChatSettings::default(),
    );
    assert!(chat.initialize().await.is_err());

    let snap = chat.snapshot();
    assert!(snap.conversations.is_empty());
    assert!(snap.current_conversation.is_none());
    assert_eq!(
        drain(&mut notices),
        vec![Notice::error("Erro ao carregar conversas")]
    );

    repo.recover(Operation::ListMessages);
    chat.load_conversations().await.unwrap();
    let snap = chat.snapshot();
    assert_eq!(snap.conversations.len(), 1);
    assert_eq!(snap.current_conversation, Some(delivery.id));
    assert_eq!(snap.message_count(), 1);
}

#[tokio::test]
async fn test_create_conversation_prepends_and_selects() {
    let (mut chat, mut notices, _repo, _endpoint) = signed_in_chat(vec![hello_reply()]).await;
    chat.send_message("Hello").await.unwrap();
    drain(&mut notices);

    let created = chat.create_conversation().await.unwrap();
    assert_eq!(created.title, "Nova Conversa");

    let snap = chat.snapshot();
    assert_eq!(snap.conversations[0].id, created.id);
    assert_eq!(snap.conversations.len(), 2);
    assert_eq!(snap.current_conversation, Some(created.id));
    assert_eq!(snap.message_count(), 0);
    assert_eq!(drain(&mut notices), vec![Notice::success("Nova conversa criada")]);
}

#[tokio::test]
async fn test_create_conversation_failure_notifies() {
    let (mut chat, mut notices, repo, _endpoint) = signed_in_chat(Vec::new()).await;
    repo.set_write_budget(Some(0));

    assert!(chat.create_conversation().await.is_err());
    assert!(chat.snapshot().conversations.is_empty());
    assert_eq!(
        drain(&mut notices),
        vec![Notice::error("Erro ao criar conversa")]
    );
}

#[tokio::test]
async fn test_subscriber_sees_final_state() {
    let (mut chat, _notices, _repo, _endpoint) = signed_in_chat(vec![hello_reply()]).await;
    let mut rx = chat.subscribe();

    chat.send_message("Hello").await.unwrap();

    assert!(rx.has_changed().unwrap());
    let snap = rx.borrow_and_update().clone();
    assert_eq!(snap.message_count(), 2);
    assert!(!snap.streaming);
}
