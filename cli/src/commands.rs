//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for streamchat
#[derive(Parser, Debug)]
#[command(name = "streamchat")]
#[command(author, version, about = "Terminal chat client with streamed replies")]
#[command(long_about = r#"
streamchat keeps a list of persisted chats and streams replies from an
OpenAI-compatible chat completion endpoint into them.

Configuration files are loaded from (in priority order):
1. STREAMCHAT_* environment variables (e.g. STREAMCHAT_API__MODEL)
2. --config <path>          Explicit config file
3. ./streamchat.toml        Project-level config
4. ~/.config/streamchat/config.toml   Global config

The API key is read from $STREAMCHAT_API_KEY unless configured otherwise.

Example:
  streamchat send "What's the best way to handle errors in Rust?"
  streamchat list
  streamchat chat
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Show configuration file locations and exit
    #[arg(long)]
    pub show_config: bool,

    /// Keep chats in memory only; nothing is written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List chats, pinned first
    List,

    /// Create a chat, optionally sending a first message
    New {
        /// First message; also used to title the chat
        message: Option<String>,
    },

    /// Print a chat's messages (defaults to the last active chat)
    Show {
        /// Chat id or unique id prefix
        chat: Option<String>,
    },

    /// Send a message and stream the reply
    Send {
        /// Chat id or unique id prefix (defaults to the last active chat)
        #[arg(short, long, value_name = "CHAT")]
        chat: Option<String>,

        /// Message text
        message: String,
    },

    /// Toggle a chat's pinned flag
    Pin {
        chat: String,
    },

    /// Rename a chat
    Rename {
        chat: String,
        title: String,
    },

    /// Delete a chat
    Delete {
        chat: String,
    },

    /// Delete every chat
    Clear {
        /// Confirm deletion
        #[arg(short, long)]
        yes: bool,
    },

    /// Make a chat the last active one
    Open {
        chat: String,
    },

    /// Interactive conversation (Ctrl-C interrupts a reply, /quit exits)
    Chat {
        /// Chat id or unique id prefix (defaults to the last active chat)
        chat: Option<String>,
    },
}

impl Command {
    /// Whether the command may contact the completion endpoint.
    pub fn needs_completion(&self) -> bool {
        match self {
            Command::New { message } => message.is_some(),
            Command::Send { .. } | Command::Chat { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_with_chat() {
        let cli = Cli::parse_from(["streamchat", "-vv", "send", "--chat", "abc", "Hello there"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Command::Send { chat, message }) => {
                assert_eq!(chat.as_deref(), Some("abc"));
                assert_eq!(message, "Hello there");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["streamchat", "list", "--ephemeral", "--no-config"]);
        assert!(cli.ephemeral);
        assert!(cli.no_config);
        assert!(matches!(cli.command, Some(Command::List)));
    }

    #[test]
    fn test_needs_completion() {
        assert!(!Command::List.needs_completion());
        assert!(!Command::New { message: None }.needs_completion());
        assert!(Command::New { message: Some("hi".into()) }.needs_completion());
        assert!(Command::Chat { chat: None }.needs_completion());
        assert!(!Command::Clear { yes: true }.needs_completion());
    }
}
