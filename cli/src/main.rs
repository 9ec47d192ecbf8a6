//! CLI entrypoint for streamchat
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod commands;
mod render;

use anyhow::{Context, Result, bail};
use clap::Parser;
use commands::{Cli, Command};
use futures::StreamExt;
use render::SnapshotPrinter;
use std::io::Write;
use std::sync::Arc;
use streamchat_application::{ChatSessionError, ChatSessionUseCase, ChatStore};
use streamchat_domain::ChatId;
use streamchat_infrastructure::{
    ConfigLoader, FileConfig, JsonFileKeyValueStore, JsonlConversationLogger, KvChatStore,
    MemoryKeyValueStore, OpenAiCompatibleClient,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.show_config {
        ConfigLoader::print_config_sources(cli.config.as_ref());
        return Ok(());
    }

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_ref())?
    };

    let command = cli.command.clone().unwrap_or(Command::List);
    info!("Starting streamchat");

    let session = build_session(&cli, &config, &command)?;
    run(command, &session).await
}

/// === Dependency Injection ===
fn build_session(cli: &Cli, config: &FileConfig, command: &Command) -> Result<ChatSessionUseCase> {
    let store: Arc<dyn ChatStore> = if cli.ephemeral {
        Arc::new(KvChatStore::with_keys(
            MemoryKeyValueStore::new(),
            &config.storage.chats_key,
            &config.storage.active_chat_key,
        ))
    } else {
        let path = config.storage.resolved_path();
        info!("Chats stored in {}", path.display());
        Arc::new(KvChatStore::with_keys(
            JsonFileKeyValueStore::new(path),
            &config.storage.chats_key,
            &config.storage.active_chat_key,
        ))
    };

    // Commands that never stream do not need credentials
    let api_key = if command.needs_completion() {
        config.api.resolve_api_key()?
    } else {
        String::new()
    };
    let gateway = Arc::new(OpenAiCompatibleClient::new(config.api.to_settings(api_key))?);

    let mut session =
        ChatSessionUseCase::new(store, gateway).with_config(config.chat.to_chat_config());

    if let Some(path) = &config.logging.conversation_log {
        match JsonlConversationLogger::open(path) {
            Some(logger) => {
                info!("Conversation log: {}", logger.path().display());
                session = session.with_conversation_logger(Arc::new(logger));
            }
            None => warn!("Conversation logging disabled"),
        }
    }

    Ok(session)
}

async fn run(command: Command, session: &ChatSessionUseCase) -> Result<()> {
    match command {
        Command::List => {
            let mut chats = session.list_chats().await?;
            if chats.is_empty() {
                println!("No chats yet. Start one with `streamchat send <MESSAGE>`.");
                return Ok(());
            }
            let active = session.last_active_chat_id().await?;
            render::sort_for_listing(&mut chats);
            for chat in &chats {
                println!("{}", render::chat_line(chat, active.as_ref() == Some(chat.id())));
            }
        }
        Command::New { message } => {
            let chat = session.create_chat(message.as_deref()).await?;
            session.set_last_active_chat_id(chat.id()).await?;
            println!("Created chat {} \"{}\"", chat.id(), chat.title());
            if let Some(message) = message {
                stream_reply(session, chat.id(), &message).await?;
            }
        }
        Command::Show { chat } => {
            let id = match chat {
                Some(chat) => resolve_chat(session, &chat).await?,
                None => active_chat(session).await?,
            };
            let chats = session.list_chats().await?;
            let chat = chats
                .iter()
                .find(|c| c.id() == &id)
                .with_context(|| format!("Chat not found: {}", id))?;
            print!("{}", render::transcript(chat));
        }
        Command::Send { chat, message } => {
            let id = match chat {
                Some(chat) => resolve_chat(session, &chat).await?,
                None => match session.last_active_chat().await? {
                    Some(chat) => chat.id().clone(),
                    None => session.create_chat(Some(message.as_str())).await?.id().clone(),
                },
            };
            session.set_last_active_chat_id(&id).await?;
            stream_reply(session, &id, &message).await?;
        }
        Command::Pin { chat } => {
            let id = resolve_chat(session, &chat).await?;
            let chat = session.toggle_pin(&id).await?;
            let state = if chat.pinned() { "Pinned" } else { "Unpinned" };
            println!("{} \"{}\"", state, chat.title());
        }
        Command::Rename { chat, title } => {
            let id = resolve_chat(session, &chat).await?;
            let chat = session.rename_chat(&id, &title).await?;
            println!("Renamed to \"{}\"", chat.title());
        }
        Command::Delete { chat } => {
            let id = resolve_chat(session, &chat).await?;
            session.delete_chat(&id).await?;
            println!("Deleted chat {}", id);
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to delete every chat without --yes");
            }
            session.clear_all_chats().await?;
            println!("All chats deleted");
        }
        Command::Open { chat } => {
            let id = resolve_chat(session, &chat).await?;
            session.set_last_active_chat_id(&id).await?;
            println!("Active chat: {}", id);
        }
        Command::Chat { chat } => {
            let id = match chat {
                Some(chat) => resolve_chat(session, &chat).await?,
                None => match session.last_active_chat().await? {
                    Some(chat) => chat.id().clone(),
                    None => session.create_chat(None).await?.id().clone(),
                },
            };
            session.set_last_active_chat_id(&id).await?;
            interactive(session, &id).await?;
        }
    }
    Ok(())
}

/// Match `arg` against chat ids, exactly or as a unique prefix.
async fn resolve_chat(session: &ChatSessionUseCase, arg: &str) -> Result<ChatId> {
    let chats = session.list_chats().await?;
    if let Some(chat) = chats.iter().find(|c| c.id().as_str() == arg) {
        return Ok(chat.id().clone());
    }

    let matches: Vec<_> = chats
        .iter()
        .filter(|c| c.id().as_str().starts_with(arg))
        .collect();
    match matches.as_slice() {
        [chat] => Ok(chat.id().clone()),
        [] => bail!("No chat matches '{}'", arg),
        _ => bail!("'{}' matches {} chats; use a longer prefix", arg, matches.len()),
    }
}

async fn active_chat(session: &ChatSessionUseCase) -> Result<ChatId> {
    match session.last_active_chat().await? {
        Some(chat) => Ok(chat.id().clone()),
        None => bail!("No active chat. Pass a chat id or run `streamchat open <CHAT>`."),
    }
}

/// Stream one reply to stdout. Ctrl-C interrupts the reply and keeps the
/// partial text.
async fn stream_reply(session: &ChatSessionUseCase, chat_id: &ChatId, text: &str) -> Result<()> {
    let mut snapshots = session.send_message(chat_id, text);
    let mut printer = SnapshotPrinter::new();
    let mut stdout = std::io::stdout();

    let outcome = loop {
        tokio::select! {
            item = snapshots.next() => match item {
                Some(Ok(chat)) => printer.update(&chat, &mut stdout)?,
                Some(Err(error)) => break Err(error),
                None => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    };
    printer.finish(&mut stdout)?;

    match outcome {
        Ok(()) => Ok(()),
        // The error message is already part of the printed reply
        Err(error @ ChatSessionError::Transport(_)) => {
            Err(anyhow::Error::new(error).context("Reply failed"))
        }
        Err(error) => Err(error.into()),
    }
}

async fn interactive(session: &ChatSessionUseCase, chat_id: &ChatId) -> Result<()> {
    let chats = session.list_chats().await?;
    if let Some(chat) = chats.iter().find(|c| c.id() == chat_id)
        && !chat.messages().is_empty()
    {
        print!("{}", render::transcript(chat));
        println!();
    }
    println!("Type a message and press Enter. /quit exits, Ctrl-C interrupts a reply.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">>> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" | "/q" => break,
            _ => {}
        }

        if let Err(e) = stream_reply(session, chat_id, line).await {
            eprintln!("{:#}", e);
        }
    }
    println!("Bye!");
    Ok(())
}
