//! Transport collaborator trait and adapters
//!
//! A transport delivers text to a participant's device. The core never
//! waits on delivery: outbound messages go through the `Outbox` and a
//! `Dispatcher` hands them to a `Transport` one at a time. The core passes
//! text through untouched; adapters expand `:shortcode:` emoji aliases in
//! everything they deliver, relayed messages included.

use crate::config::CommandConfig;
use crate::error::{PairError, Result};
use crate::types::ParticipantId;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Optional UI affordances attached to an outbound message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentationHints {
    /// Suggested quick replies, rendered as a reply keyboard where supported
    pub quick_replies: Vec<String>,
}

impl PresentationHints {
    /// No affordances
    pub fn none() -> Self {
        Self::default()
    }

    /// Suggest the given quick replies
    pub fn quick_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            quick_replies: replies.into_iter().map(Into::into).collect(),
        }
    }
}

/// Reply keyboards offered with notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    /// Outside a chat: offers the seek command
    Main,
    /// Waiting or chatting: offers the exit command
    Exit,
}

impl Keyboard {
    /// Hints showing the first configured phrase of the matching command
    pub fn hints(self, commands: &CommandConfig) -> PresentationHints {
        let phrases = match self {
            Keyboard::Main => &commands.seek,
            Keyboard::Exit => &commands.exit,
        };
        PresentationHints::quick_replies(phrases.first().cloned())
    }
}

/// Trait for transport adapters
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g., "stdio", "memory")
    fn name(&self) -> &str;

    /// Deliver text to a participant
    async fn send(&self, to: &ParticipantId, text: &str, hints: &PresentationHints)
        -> Result<()>;
}

/// Expand `:shortcode:` emoji aliases (`:wave:`, `:busts_in_silhouette:`)
///
/// Unknown shortcodes and stray colons are left as written.
pub fn emojize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(':') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        if let Some(len) = after.find(|c: char| !is_shortcode_char(c)) {
            if len > 0 && after[len..].starts_with(':') {
                if let Some(emoji) = emojis::get_by_shortcode(&after[..len]) {
                    out.push_str(emoji.as_str());
                    rest = &after[len + 1..];
                    continue;
                }
            }
        }

        out.push(':');
        rest = after;
    }

    out.push_str(rest);
    out
}

fn is_shortcode_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-')
}

/// Line-oriented transport writing to stdout
///
/// Each message is written as `[<participant>] <text>`, followed by a
/// `  > reply | reply` line when quick replies are suggested.
pub struct StdioTransport {
    out: tokio::sync::Mutex<tokio::io::Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            out: tokio::sync::Mutex::new(tokio::io::stdout()),
        }
    }

    /// Render one outbound message as written to stdout
    pub fn render(to: &ParticipantId, text: &str, hints: &PresentationHints) -> String {
        let mut line = format!("[{}] {}\n", to, emojize(text));
        if !hints.quick_replies.is_empty() {
            let replies: Vec<String> = hints.quick_replies.iter().map(|r| emojize(r)).collect();
            line.push_str(&format!("  > {}\n", replies.join(" | ")));
        }
        line
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn send(
        &self,
        to: &ParticipantId,
        text: &str,
        hints: &PresentationHints,
    ) -> Result<()> {
        let rendered = Self::render(to, text, hints);
        let mut out = self.out.lock().await;
        out.write_all(rendered.as_bytes())
            .await
            .map_err(|e| PairError::Transport(format!("stdout write failed: {}", e)))?;
        out.flush()
            .await
            .map_err(|e| PairError::Transport(format!("stdout flush failed: {}", e)))
    }
}

/// A message captured by `MemoryTransport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub to: ParticipantId,
    pub text: String,
    pub hints: PresentationHints,
}

/// In-memory transport for testing and single-process use
///
/// Records every delivery as the device would show it, with shortcodes
/// expanded; participants marked unreachable fail with
/// `PairError::Transport`.
#[derive(Default)]
pub struct MemoryTransport {
    delivered: Mutex<Vec<Delivered>>,
    unreachable: Mutex<Vec<ParticipantId>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `id` fail
    pub fn mark_unreachable(&self, id: impl Into<ParticipantId>) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.push(id.into());
        }
    }

    /// All deliveries so far, in order
    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Deliveries addressed to one participant, in order
    pub fn delivered_to(&self, id: &ParticipantId) -> Vec<Delivered> {
        self.delivered()
            .into_iter()
            .filter(|d| &d.to == id)
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(
        &self,
        to: &ParticipantId,
        text: &str,
        hints: &PresentationHints,
    ) -> Result<()> {
        let unreachable = self
            .unreachable
            .lock()
            .map(|u| u.contains(to))
            .unwrap_or(false);
        if unreachable {
            return Err(PairError::Transport(format!("{} is unreachable", to)));
        }

        let mut delivered = self
            .delivered
            .lock()
            .map_err(|e| PairError::Transport(format!("Failed to acquire lock: {}", e)))?;
        delivered.push(Delivered {
            to: to.clone(),
            text: emojize(text),
            hints: PresentationHints::quick_replies(hints.quick_replies.iter().map(|r| emojize(r))),
        });
        Ok(())
    }
}
