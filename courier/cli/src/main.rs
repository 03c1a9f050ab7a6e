//! Courier Chat - Terminal Surface for the Courier Assistant
//!
//! Reads user messages from stdin and prints the assistant's reply as it
//! streams in.
//!
//! # Usage
//!
//! ```bash
//! # Chat in the most recent conversation
//! courier-chat --backend-url https://project.example.co --access-token $JWT chat
//!
//! # Continue a specific conversation
//! courier-chat chat --conversation 5b1c...
//!
//! # List conversations
//! courier-chat conversations
//!
//! # Verbose logging
//! RUST_LOG=courier_core=trace courier-chat chat
//! ```
//!
//! Inside `chat`, `/new` starts a conversation and `/quit` exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use courier_core::config::{default_config_path, load_config_from_path};
use courier_core::{
    Access, ChatController, ChatSnapshot, ConfigOverrides, ConversationId, HttpChatEndpoint,
    MessageId, MessageRole, Notice, NotifyLevel, RestRepository,
};

type Controller = ChatController<RestRepository, HttpChatEndpoint>;

/// Courier Chat - streaming assistant in the terminal
#[derive(Parser, Debug)]
#[command(name = "courier-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "COURIER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Public API key
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// Signed-in user's access token
    #[arg(long, value_name = "TOKEN")]
    access_token: Option<String>,

    /// Log at debug level
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat interactively
    Chat {
        /// Conversation to open instead of the most recent one
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },
    /// List conversations, most recent first
    Conversations,
}

/// Initialize logging to stderr so replies on stdout stay clean
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("courier_core={level},courier_cli={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn overrides_from(args: &Args) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.backend_url {
        overrides = overrides.with_backend_url(url.clone());
    }
    if let Some(ref key) = args.api_key {
        overrides = overrides.with_api_key(key.clone());
    }
    if let Some(ref token) = args.access_token {
        overrides = overrides.with_access_token(token.clone());
    }
    overrides
}

fn level_label(level: NotifyLevel) -> &'static str {
    match level {
        NotifyLevel::Info => "info",
        NotifyLevel::Success => "ok",
        NotifyLevel::Warning => "warning",
        NotifyLevel::Error => "error",
    }
}

/// Print notices to stderr until the controller goes away
async fn print_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        eprintln!("[{}] {}", level_label(notice.level), notice.message);
    }
}

/// Tracks what has been written of the reply in flight
#[derive(Debug, Default)]
struct ReplyRenderer {
    /// Bytes of the draft already written
    printed: usize,
    was_streaming: bool,
    /// Last durable message when the exchange started
    before: Option<MessageId>,
}

impl ReplyRenderer {
    /// Text to write for this snapshot
    ///
    /// Only the draft's new suffix is returned. When streaming stops, the
    /// rest of the final message is flushed, but only if that message was
    /// produced by this exchange.
    fn render(&mut self, snap: &ChatSnapshot) -> String {
        let mut out = String::new();

        if snap.streaming && !self.was_streaming {
            self.before = snap
                .messages
                .iter()
                .rev()
                .find(|m| !m.is_draft())
                .map(|m| m.id.clone());
        }

        if let Some(draft) = snap.draft() {
            if let Some(suffix) = draft.content.get(self.printed..) {
                out.push_str(suffix);
                self.printed = draft.content.len();
            }
        }

        if self.was_streaming && !snap.streaming {
            let reply = snap.messages.last().filter(|m| {
                m.role == MessageRole::Assistant
                    && !m.is_draft()
                    && self.before.as_ref() != Some(&m.id)
            });
            if let Some(rest) = reply.and_then(|m| m.content.get(self.printed..)) {
                out.push_str(rest);
            }
            if reply.is_some() || self.printed > 0 {
                out.push('\n');
            }
            self.printed = 0;
            self.before = None;
        }

        self.was_streaming = snap.streaming;
        out
    }
}

/// Print the assistant draft as it grows
async fn render_replies(mut rx: watch::Receiver<Arc<ChatSnapshot>>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut renderer = ReplyRenderer::default();

    while rx.changed().await.is_ok() {
        let snap = Arc::clone(&rx.borrow_and_update());
        let text = renderer.render(&snap);
        if !text.is_empty() {
            stdout.write_all(text.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

fn print_history(snap: &ChatSnapshot) {
    if let Some(conversation) = snap.current() {
        println!("== {} ==", conversation.title);
    }
    for message in snap.messages.iter() {
        let who = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        println!("{who}: {}", message.content);
    }
}

async fn start(chat: &mut Controller) -> Result<()> {
    match chat
        .initialize()
        .await
        .context("Failed to start chat session")?
    {
        Access::Granted(session) => {
            info!(user = %session.user_id, "Signed in");
            Ok(())
        }
        Access::Denied(reason) => {
            bail!("Not signed in ({reason:?}): set COURIER_ACCESS_TOKEN or pass --access-token")
        }
    }
}

async fn run_chat(chat: &mut Controller, conversation: Option<String>) -> Result<()> {
    if let Some(id) = conversation {
        chat.select_conversation(ConversationId::new(id))
            .await
            .context("Failed to open conversation")?;
    }
    print_history(&chat.snapshot());

    let renderer = tokio::spawn(render_replies(chat.subscribe()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "/quit" => break,
            "/new" => {
                // Failure is reported as a notice
                let _ = chat.create_conversation().await;
            }
            _ => {
                if let Err(e) = chat.send_message(&line).await {
                    debug!(error = %e, "Message not sent");
                }
            }
        }
    }

    renderer.abort();
    Ok(())
}

fn list_conversations(chat: &Controller) {
    let snap = chat.snapshot();
    if snap.conversations.is_empty() {
        println!("No conversations yet");
        return;
    }
    for conversation in snap.conversations.iter() {
        let marker = if snap.current_conversation.as_ref() == Some(&conversation.id) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {}  {}",
            conversation.id,
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
            conversation.title
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(path.as_deref()).context("Failed to load configuration")?;
    overrides_from(&args).apply(&mut config);
    config.validate().context("Invalid configuration")?;

    debug!(
        source = %config.source(),
        backend = %config.backend.url,
        endpoint = %config.chat_endpoint_url(),
        "Configuration loaded"
    );

    let repo = Arc::new(
        RestRepository::new(&config.backend).context("Failed to build backend client")?,
    );
    let endpoint = Arc::new(
        HttpChatEndpoint::new(&config.backend, &config.chat.function_path)
            .context("Failed to build chat endpoint client")?,
    );

    let (mut chat, notices) = ChatController::new(repo, endpoint, config.chat.clone());
    let notice_printer = tokio::spawn(print_notices(notices));

    start(&mut chat).await?;

    match args.command {
        Command::Chat { conversation } => run_chat(&mut chat, conversation).await?,
        Command::Conversations => list_conversations(&chat),
    }

    drop(chat);
    let _ = notice_printer.await;
    Ok(())
}
