//! Core participant types for the a3s-pair system
//!
//! All types use camelCase JSON serialization for on-disk compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable participant identity
///
/// Transports map their native addressing (chat id, socket id, ...) onto
/// this. Ordering is used to acquire two record locks without deadlock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a participant id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantState {
    /// Not looking for a partner
    #[default]
    Idle,
    /// Waiting in the queue for a counterpart
    Seeking,
    /// Currently paired; `partner_id` is set
    Paired,
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Seeking => "seeking",
            Self::Paired => "paired",
        };
        f.write_str(s)
    }
}

/// Persisted state record for a single participant
///
/// `partner_id` is a symmetric back-reference: when A points at B,
/// B points at A and both are `Paired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Stable identity
    pub id: ParticipantId,

    /// Current lifecycle state
    #[serde(default)]
    pub state: ParticipantState,

    /// Partner reference, set iff `state == Paired`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<ParticipantId>,

    /// Unix timestamp in milliseconds of the last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

impl Participant {
    /// Create a fresh Idle record
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            state: ParticipantState::Idle,
            partner_id: None,
            last_seen: None,
        }
    }

    /// Whether the record satisfies the local partner invariant
    /// (partner set iff Paired, never self)
    pub fn is_well_formed(&self) -> bool {
        match (&self.state, &self.partner_id) {
            (ParticipantState::Paired, Some(partner)) => partner != &self.id,
            (ParticipantState::Paired, None) => false,
            (_, partner) => partner.is_none(),
        }
    }

    /// Whether this record is paired with `other`
    pub fn is_paired_with(&self, other: &ParticipantId) -> bool {
        self.state == ParticipantState::Paired && self.partner_id.as_ref() == Some(other)
    }

    /// Reset to Idle with no partner
    pub(crate) fn reset(&mut self) {
        self.state = ParticipantState::Idle;
        self.partner_id = None;
    }
}

/// Participant counts grouped by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCounts {
    pub idle: usize,
    pub seeking: usize,
    pub paired: usize,
    pub total: usize,
}

impl StateCounts {
    pub(crate) fn record(&mut self, state: ParticipantState) {
        match state {
            ParticipantState::Idle => self.idle += 1,
            ParticipantState::Seeking => self.seeking += 1,
            ParticipantState::Paired => self.paired += 1,
        }
        self.total += 1;
    }
}
