//! Configuration for a3s-pair
//!
//! All fields default, so an empty JSON object is a valid configuration.

use crate::engine::DEFAULT_MAX_MATCH_ATTEMPTS;
use crate::error::{PairError, Result};
use crate::persist::FileRecordStore;
use crate::store::ParticipantStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairConfig {
    /// Directory for durable participant records; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Candidate-search rounds per pairing request
    pub max_match_attempts: usize,

    /// Phrases recognised as commands
    pub commands: CommandConfig,

    /// Notification texts
    pub messages: MessageTemplates,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            max_match_attempts: DEFAULT_MAX_MATCH_ATTEMPTS,
            commands: CommandConfig::default(),
            messages: MessageTemplates::default(),
        }
    }
}

impl PairConfig {
    /// Parse a configuration from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| PairError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PairError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.max_match_attempts == 0 {
            return Err(PairError::Config(
                "maxMatchAttempts must be at least 1".to_string(),
            ));
        }
        for (name, phrases) in [
            ("join", &self.commands.join),
            ("seek", &self.commands.seek),
            ("exit", &self.commands.exit),
        ] {
            if phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(PairError::Config(format!(
                    "commands.{} needs at least one phrase",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Open the participant store this configuration describes
    pub async fn open_store(&self) -> Result<ParticipantStore> {
        match &self.state_dir {
            Some(dir) => ParticipantStore::open(FileRecordStore::new(dir)).await,
            None => Ok(ParticipantStore::in_memory()),
        }
    }
}

/// Phrases that classify an inbound payload as a command
///
/// The first phrase of `seek` and `exit` is offered as a quick reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandConfig {
    pub join: Vec<String>,
    pub seek: Vec<String>,
    pub exit: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            join: vec!["/start".to_string()],
            seek: vec![
                ":busts_in_silhouette: Random Connect".to_string(),
                "/seek".to_string(),
            ],
            exit: vec![":x: Exit".to_string(), "/exit".to_string()],
        }
    }
}

/// Notification texts; `{partner}` is replaced with the partner's id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageTemplates {
    pub welcome: String,
    pub waiting: String,
    pub connected: String,
    pub exit_ack: String,
    pub partner_left: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            welcome: "Hey, welcome! :wave:".to_string(),
            waiting: "Connecting to a random stranger... :busts_in_silhouette:".to_string(),
            connected: "Connected to {partner}".to_string(),
            exit_ack: ":x: Exit".to_string(),
            partner_left: "Oops... the other user ended the chat\n :x: Exit".to_string(),
        }
    }
}

impl MessageTemplates {
    /// Render the connected notification for `partner`
    pub fn connected_to(&self, partner: &str) -> String {
        self.connected.replace("{partner}", partner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PairConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_match_attempts, DEFAULT_MAX_MATCH_ATTEMPTS);
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = PairConfig::from_json("{}").unwrap();
        assert_eq!(config.commands.join, vec!["/start"]);
        assert_eq!(config.messages.connected_to("42"), "Connected to 42");
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = PairConfig::from_json(
            r#"{
                "stateDir": "/var/lib/a3s-pair",
                "maxMatchAttempts": 4,
                "messages": { "welcome": "Hi" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/a3s-pair")));
        assert_eq!(config.max_match_attempts, 4);
        assert_eq!(config.messages.welcome, "Hi");
        // Untouched templates keep their defaults
        assert!(config.messages.waiting.starts_with("Connecting"));
    }

    #[test]
    fn test_validation_errors() {
        let err = PairConfig::from_json(r#"{"maxMatchAttempts": 0}"#).unwrap_err();
        assert!(matches!(err, PairError::Config(_)));

        let err = PairConfig::from_json(r#"{"commands": {"exit": []}}"#).unwrap_err();
        assert!(err.to_string().contains("commands.exit"));

        let err = PairConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, PairError::Config(_)));
    }

    #[test]
    fn test_serialization_is_camel_case() {
        let json = serde_json::to_string(&PairConfig::default()).unwrap();
        assert!(json.contains("maxMatchAttempts"));
        assert!(json.contains("exitAck"));
        assert!(json.contains("partnerLeft"));
        assert!(!json.contains("stateDir"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PairConfig::load(Path::new("/nonexistent/a3s-pair.json")).unwrap_err();
        assert!(matches!(err, PairError::Config(_)));
    }

    #[tokio::test]
    async fn test_open_store_in_memory_and_file() {
        let store = PairConfig::default().open_store().await.unwrap();
        assert!(store.is_empty());

        let dir = std::env::temp_dir().join(format!("a3s-pair-test-{}", uuid::Uuid::new_v4()));
        let config = PairConfig {
            state_dir: Some(dir.clone()),
            ..PairConfig::default()
        };
        let store = config.open_store().await.unwrap();
        store.get(&"a".into()).await.unwrap();
        assert!(FileRecordStore::new(&dir).record_path(&"a".into()).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
