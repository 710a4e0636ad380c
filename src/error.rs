//! Error types for a3s-pair

use crate::types::ParticipantId;
use thiserror::Error;

/// Errors that can occur in the pairing system
#[derive(Debug, Error)]
pub enum PairError {
    /// Participant record absent and auto-creation not allowed
    #[error("Participant not found: {0}")]
    NotFound(ParticipantId),

    /// A Paired participant's partner does not point back
    #[error("Inconsistent pair state: {participant} -> {partner} is not reciprocated")]
    InconsistentPairState {
        participant: ParticipantId,
        partner: ParticipantId,
    },

    /// A pairing candidate was claimed by another request first
    #[error("Candidate {0} was claimed by a concurrent request")]
    ConcurrentConflict(ParticipantId),

    /// Durable record storage failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound delivery failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for pairing operations
pub type Result<T> = std::result::Result<T, PairError>;
