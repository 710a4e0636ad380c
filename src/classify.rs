//! Inbound payload classification
//!
//! Runs in the transport layer, before the `SessionController` sees an
//! event. The core never inspects command phrases itself.

use crate::config::CommandConfig;
use crate::transport::emojize;

/// Classified inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// First contact / restart
    Join,
    /// Find a partner
    Seek,
    /// Leave the current chat or queue
    Exit,
    /// Anything else, relayed to the partner
    Message(String),
}

/// Maps payloads to events by exact phrase match
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    join: Vec<String>,
    seek: Vec<String>,
    exit: Vec<String>,
}

impl CommandClassifier {
    pub fn from_config(config: &CommandConfig) -> Self {
        let normalize = |phrases: &[String]| -> Vec<String> {
            phrases
                .iter()
                .map(|p| emojize(p.trim()))
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            join: normalize(&config.join),
            seek: normalize(&config.seek),
            exit: normalize(&config.exit),
        }
    }

    /// Classify a raw payload
    ///
    /// Slash commands may carry a `@botname` suffix (`/start@MyBot`).
    pub fn classify(&self, payload: &str) -> InboundEvent {
        let normalized = emojize(payload.trim());
        let command = match normalized.split_once('@') {
            Some((head, tail)) if head.starts_with('/') && !tail.contains(' ') => head,
            _ => normalized.as_str(),
        };

        if self.join.iter().any(|p| p == command) {
            InboundEvent::Join
        } else if self.seek.iter().any(|p| p == command) {
            InboundEvent::Seek
        } else if self.exit.iter().any(|p| p == command) {
            InboundEvent::Exit
        } else {
            InboundEvent::Message(payload.to_string())
        }
    }
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::from_config(&CommandConfig::default())
    }
}
