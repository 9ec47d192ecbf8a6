//! Server-sent event framing for streamed chat completions.
//!
//! The endpoint answers with newline-delimited frames:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//! data: [DONE]
//! ```
//!
//! Network chunks do not respect frame boundaries, so [`SseLineDecoder`]
//! buffers bytes until a full line is available. Lines are only decoded
//! once complete, which keeps multi-byte UTF-8 sequences that straddle a
//! chunk boundary intact.

use serde::Deserialize;
use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// A meaningful event extracted from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A non-empty text fragment of the reply.
    Delta(String),
    /// The `[DONE]` sentinel. Nothing after it is processed.
    Done,
}

/// Incremental line decoder with a carry-over buffer.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return the events of every line it
    /// completed, in arrival order.
    ///
    /// Once [`SseEvent::Done`] has been returned the decoder discards
    /// everything, including bytes that followed the sentinel in the same
    /// chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        // Bytes already in the buffer hold no newline
        let mut start = 0;
        let mut scan = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        while let Some(offset) = self.buffer[scan..].iter().position(|&b| b == b'\n') {
            let newline = scan + offset;
            let line = &self.buffer[start..newline];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            start = newline + 1;
            scan = start;

            let event = parse_line(&String::from_utf8_lossy(line));
            match event {
                Some(SseEvent::Done) => {
                    self.done = true;
                    self.buffer.clear();
                    events.push(SseEvent::Done);
                    return events;
                }
                Some(event) => events.push(event),
                None => {}
            }
        }

        self.buffer.drain(..start);
        events
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes of an incomplete trailing line, if any.
    ///
    /// The stream discards these when the connection closes.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Interpret one complete line (without its terminator).
///
/// Returns `None` for lines that carry nothing: non-`data: ` lines,
/// unparseable payloads and frames without content.
pub fn parse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk.into_content().map(SseEvent::Delta),
        Err(e) => {
            debug!("Skipping malformed stream frame: {}", e);
            None
        }
    }
}

/// Payload of one streamed frame. Every link may be absent.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl StreamChunk {
    /// `choices[0].delta.content`, if present and non-empty.
    fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()?
            .delta?
            .content
            .filter(|content| !content.is_empty())
    }
}
