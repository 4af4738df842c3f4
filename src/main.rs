//! `colloquy` command line entry point.

mod cli;

use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command, ExportArgs};
use colloquy::adapters::backend::HttpChatBackend;
use colloquy::adapters::storage::FileConversationStore;
use colloquy::application::{
    ChatSession, DispatchError, MessageDispatcher, RetryManager, SendMode, SessionEvent,
};
use colloquy::config::{AppConfig, ConfigError, LoggingConfig, ValidationError};
use colloquy::domain::conversation::Conversation;
use colloquy::domain::export::{ConversationExporter, ExportError, ExportFormat, ExportOptions};
use colloquy::domain::foundation::ConversationId;
use colloquy::ports::{BackendError, ConversationStore, StoreError};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging, args.log_level.as_deref());

    match run(args.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
fn init_tracing(logging: &LoggingConfig, override_level: Option<&str>) {
    let filter = match override_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.is_production() {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn run(command: Command, config: AppConfig) -> Result<(), CliError> {
    config.storage.validate()?;
    let store = Arc::new(FileConversationStore::open(&config.storage.data_dir).await?);

    let result = match command {
        Command::Send {
            conversation,
            atomic,
            text,
        } => send(&config, store.clone(), conversation, atomic, &text).await,
        Command::List => list(store.as_ref()).await,
        Command::Search { query } => search(store.as_ref(), &query).await,
        Command::Show { id } => show(store.as_ref(), id).await,
        Command::Export(export_args) => export(store.as_ref(), &export_args).await,
        Command::Delete { id } => {
            store.delete(id).await?;
            println!("deleted {id}");
            Ok(())
        }
    };

    store.close().await?;
    result
}

async fn send(
    config: &AppConfig,
    store: Arc<FileConversationStore>,
    conversation: Option<ConversationId>,
    atomic: bool,
    text: &str,
) -> Result<(), CliError> {
    config.validate()?;
    let backend = HttpChatBackend::new(config.backend.to_http_config())?;
    tracing::debug!(endpoint = backend.endpoint(), atomic, "chat backend ready");
    let dispatcher = MessageDispatcher::new(
        Arc::new(backend),
        store,
        RetryManager::new(config.retry.to_policy()),
    )
    .with_fallback_message(config.fallback_message.clone());

    let mode = if atomic || !config.backend.stream_by_default {
        SendMode::Atomic
    } else {
        SendMode::Streaming
    };
    let session = ChatSession::new(Arc::new(dispatcher)).with_default_mode(mode);
    if let Some(id) = conversation {
        session.switch_to(id).await?;
    }

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = false;
        let mut stdout = std::io::stdout();
        loop {
            match events.recv().await {
                Ok(SessionEvent::TextAppended { fragment, .. }) => {
                    printed = true;
                    let _ = write!(stdout, "{fragment}");
                    let _ = stdout.flush();
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        printed
    });

    let outcome = session.send(text).await;
    // Dropping the session closes the event channel and ends the printer.
    drop(session);
    let streamed = printer.await.unwrap_or(false);
    let outcome = outcome?;

    if streamed {
        println!();
    } else if let Some(reply) = outcome.assistant_message() {
        println!("{}", reply.text());
    }
    if let Some(failure) = &outcome.failure {
        tracing::warn!(conversation_id = %outcome.conversation_id, %failure, "reply replaced by fallback");
    }
    eprintln!("conversation {}", outcome.conversation_id);
    Ok(())
}

async fn list(store: &dyn ConversationStore) -> Result<(), CliError> {
    print_summaries(store.list().await?);
    Ok(())
}

async fn search(store: &dyn ConversationStore, query: &str) -> Result<(), CliError> {
    print_summaries(store.search(query).await?);
    Ok(())
}

fn print_summaries(mut conversations: Vec<Conversation>) {
    conversations.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
    for conversation in conversations {
        println!(
            "{}  {}  {:>3} messages  {}",
            conversation.id(),
            conversation.updated_at().display_string(),
            conversation.message_count(),
            conversation.title()
        );
    }
}

async fn show(store: &dyn ConversationStore, id: ConversationId) -> Result<(), CliError> {
    let conversation = store.get(id).await?;
    let document =
        ConversationExporter::new().export(&conversation, ExportFormat::Text, &ExportOptions::default())?;
    print!("{}", document.content);
    Ok(())
}

async fn export(store: &dyn ConversationStore, args: &ExportArgs) -> Result<(), CliError> {
    let conversation = store.get(args.id).await?;
    let document = ConversationExporter::new().export(&conversation, args.format, &args.options())?;

    match &args.out {
        Some(path) => {
            let target = if path.is_dir() {
                path.join(&document.filename)
            } else {
                path.clone()
            };
            write_document(&target, &document.content).await?;
            eprintln!("wrote {}", target.display());
        }
        None => print!("{}", document.content),
    }
    Ok(())
}

async fn write_document(path: &Path, content: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}
