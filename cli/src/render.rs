//! Terminal rendering of chats and streamed replies.

use colored::Colorize;
use std::io::{self, Write};
use streamchat_domain::{Chat, MessageId};

/// Prints a reply incrementally from successive chat snapshots.
///
/// Each snapshot carries the whole chat; only the text appended to the
/// trailing assistant message since the previous snapshot is written.
#[derive(Debug, Default)]
pub struct SnapshotPrinter {
    message_id: Option<MessageId>,
    printed: usize,
}

impl SnapshotPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chat: &Chat, out: &mut impl Write) -> io::Result<()> {
        let Some(message) = chat.last_message() else {
            return Ok(());
        };
        if message.is_user() {
            return Ok(());
        }

        if self.message_id.as_ref() != Some(message.id()) {
            if self.message_id.is_some() {
                writeln!(out)?;
            }
            self.message_id = Some(message.id().clone());
            self.printed = 0;

            if message.is_error() {
                write!(out, "{}", message.text().red())?;
                self.printed = message.text().len();
                return out.flush();
            }
        }

        // Text only ever grows, so the printed prefix ends on a char boundary
        let text = message.text();
        if let Some(fresh) = text.get(self.printed..)
            && !fresh.is_empty()
        {
            write!(out, "{}", fresh)?;
            self.printed = text.len();
        }
        out.flush()
    }

    /// Terminate the current reply line, if one was started.
    pub fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.message_id.take().is_some() {
            writeln!(out)?;
        }
        self.printed = 0;
        out.flush()
    }
}

/// One line per chat: pin marker, short id, title and message count.
pub fn chat_line(chat: &Chat, active: bool) -> String {
    let marker = if chat.pinned() { "*".yellow().bold().to_string() } else { " ".to_string() };
    let current = if active { ">".green().bold().to_string() } else { " ".to_string() };
    format!(
        "{}{} {}  {}  {}",
        current,
        marker,
        short_id(chat).dimmed(),
        chat.title().bold(),
        format!("({} messages)", chat.messages().len()).dimmed()
    )
}

/// Full transcript of a chat.
pub fn transcript(chat: &Chat) -> String {
    let mut output = format!("{} {}\n", "Chat:".cyan().bold(), chat.title());
    output.push_str(&format!("{} {}\n", "Id:".cyan().bold(), chat.id()));

    for message in chat.messages() {
        output.push('\n');
        if message.is_user() {
            output.push_str(&format!("{}\n{}\n", "You".blue().bold(), message.text()));
        } else if message.is_error() {
            output.push_str(&format!("{}\n{}\n", "Error".red().bold(), message.text().red()));
        } else {
            let label = if message.is_streaming() { "Assistant (incomplete)" } else { "Assistant" };
            output.push_str(&format!("{}\n{}\n", label.green().bold(), message.text()));
        }
    }
    output
}

fn short_id(chat: &Chat) -> &str {
    streamchat_domain::core::string::truncate_chars(chat.id().as_str(), 8)
}

/// Order for listing: pinned chats first, newest first within each group.
pub fn sort_for_listing(chats: &mut [Chat]) {
    chats.sort_by(|a, b| {
        b.pinned()
            .cmp(&a.pinned())
            .then_with(|| b.created_at().cmp(&a.created_at()))
    });
}
