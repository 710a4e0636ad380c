//! Pair formation and teardown
//!
//! `MatchEngine` is the only component that moves participants between
//! Idle, Seeking and Paired. Both sides of a pair are always written while
//! both record locks are held (acquired in id order), so no reader that
//! locks a record ever observes a half-formed or half-dissolved pair.

use crate::error::{PairError, Result};
use crate::store::{ParticipantStore, RecordGuard};
use crate::types::{Participant, ParticipantId, ParticipantState};
use std::sync::Arc;

/// Default number of candidate-search rounds before a request settles on
/// waiting
pub const DEFAULT_MAX_MATCH_ATTEMPTS: usize = 16;

/// Result of a pairing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// This request formed a new pair with the given partner
    Paired(ParticipantId),
    /// No counterpart available; the requester stays Seeking
    Waiting,
    /// A concurrent request already paired the requester; that request
    /// is responsible for notifying both sides
    AlreadyPaired(ParticipantId),
    /// The requester left the queue while the search was running
    Withdrawn,
}

/// Full report of a pairing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingReport {
    pub outcome: PairingOutcome,

    /// Former partner, when the requester was Paired and re-seeking
    /// dissolved that pair first
    pub dissolved: Option<ParticipantId>,
}

/// Hooks run while both records of a pair are still locked
///
/// Anything enqueued from a hook is ordered before any message relayed
/// over the new (or after the dissolved) pair. Hooks must not block.
pub trait PairObserver: Send + Sync {
    /// A pair was formed by `requester`'s request
    fn paired(&self, _requester: &ParticipantId, _partner: &ParticipantId) {}

    /// A pair was dissolved by `initiator`
    fn dissolved(&self, _initiator: &ParticipantId, _former: &ParticipantId) {}
}

impl PairObserver for () {}

/// Creates and dissolves pairs over a shared `ParticipantStore`
pub struct MatchEngine {
    store: Arc<ParticipantStore>,
    max_attempts: usize,
}

impl MatchEngine {
    /// Create an engine with the default retry budget
    pub fn new(store: Arc<ParticipantStore>) -> Self {
        Self::with_max_attempts(store, DEFAULT_MAX_MATCH_ATTEMPTS)
    }

    /// Create an engine with an explicit candidate-search retry budget
    pub fn with_max_attempts(store: Arc<ParticipantStore>, max_attempts: usize) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Get a reference to the underlying store
    pub fn store(&self) -> &ParticipantStore {
        &self.store
    }

    /// Ensure a record exists and take the participant out of the queue
    ///
    /// An existing pair is left untouched.
    pub async fn register(&self, id: &ParticipantId) -> Result<Participant> {
        let mut guard = self.store.lock(id).await?;
        if guard.state == ParticipantState::Seeking {
            guard.reset();
            self.store.commit(&mut guard).await?;
            tracing::debug!(participant = %id, "Withdrawn from queue on join");
        }
        Ok(guard.clone())
    }

    /// Put a participant in the queue and try to pair it
    pub async fn request_pairing(&self, id: &ParticipantId) -> Result<PairingReport> {
        self.request_pairing_observed(id, &()).await
    }

    /// `request_pairing`, reporting pair changes to `observer` under lock
    pub async fn request_pairing_observed(
        &self,
        id: &ParticipantId,
        observer: &dyn PairObserver,
    ) -> Result<PairingReport> {
        let dissolved = self.enter_queue(id, observer).await?;

        for attempt in 1..=self.max_attempts {
            let Some(candidate) = self.store.find_seeking_other_than(id).await else {
                tracing::debug!(participant = %id, "No counterpart available, waiting");
                return Ok(PairingReport {
                    outcome: PairingOutcome::Waiting,
                    dissolved,
                });
            };

            let (mut mine, mut theirs) = self.store.lock_pair(id, &candidate.id).await?;

            // Re-validate the requester: a concurrent request may have
            // claimed it, or it may have left the queue
            match (mine.state, mine.partner_id.clone()) {
                (ParticipantState::Seeking, _) => {}
                (ParticipantState::Paired, Some(partner)) => {
                    return Ok(PairingReport {
                        outcome: PairingOutcome::AlreadyPaired(partner),
                        dissolved,
                    });
                }
                _ => {
                    return Ok(PairingReport {
                        outcome: PairingOutcome::Withdrawn,
                        dissolved,
                    });
                }
            }

            // Checked-and-set on the candidate
            if theirs.state != ParticipantState::Seeking {
                let conflict = PairError::ConcurrentConflict(candidate.id.clone());
                tracing::debug!(
                    participant = %id,
                    attempt,
                    reason = %conflict,
                    "Candidate no longer seeking, retrying"
                );
                continue;
            }

            mine.state = ParticipantState::Paired;
            mine.partner_id = Some(theirs.id.clone());
            theirs.state = ParticipantState::Paired;
            theirs.partner_id = Some(mine.id.clone());
            self.commit_both(&mut mine, &mut theirs).await?;
            observer.paired(id, &candidate.id);

            tracing::info!(participant = %id, partner = %candidate.id, "Pair formed");
            return Ok(PairingReport {
                outcome: PairingOutcome::Paired(candidate.id),
                dissolved,
            });
        }

        tracing::debug!(
            participant = %id,
            attempts = self.max_attempts,
            "Match attempts exhausted, waiting"
        );
        Ok(PairingReport {
            outcome: PairingOutcome::Waiting,
            dissolved,
        })
    }

    /// Dissolve the participant's pair, if any
    ///
    /// Returns the former partner. A participant that is not paired (or
    /// has never been seen) is left untouched and yields `None`.
    pub async fn dissolve_pairing(&self, id: &ParticipantId) -> Result<Option<ParticipantId>> {
        self.dissolve(id, false, &()).await
    }

    /// Exit path: dissolve any pair and withdraw from the queue in one step
    ///
    /// Returns the former partner, if the participant was paired.
    pub async fn leave(&self, id: &ParticipantId) -> Result<Option<ParticipantId>> {
        self.leave_observed(id, &()).await
    }

    /// `leave`, reporting a dissolved pair to `observer` under lock
    pub async fn leave_observed(
        &self,
        id: &ParticipantId,
        observer: &dyn PairObserver,
    ) -> Result<Option<ParticipantId>> {
        self.dissolve(id, true, observer).await
    }

    /// Move the requester to Seeking, dissolving an existing pair first
    async fn enter_queue(
        &self,
        id: &ParticipantId,
        observer: &dyn PairObserver,
    ) -> Result<Option<ParticipantId>> {
        let mut dissolved = None;
        loop {
            let mut guard = self.store.lock(id).await?;
            match guard.state {
                ParticipantState::Idle => {
                    guard.state = ParticipantState::Seeking;
                    guard.partner_id = None;
                    self.store.commit(&mut guard).await?;
                    tracing::debug!(participant = %id, "Entered queue");
                    return Ok(dissolved);
                }
                ParticipantState::Seeking => return Ok(dissolved),
                ParticipantState::Paired => {
                    drop(guard);
                    if let Some(former) = self.dissolve(id, false, observer).await? {
                        dissolved = Some(former);
                    }
                }
            }
        }
    }

    async fn dissolve(
        &self,
        id: &ParticipantId,
        withdraw: bool,
        observer: &dyn PairObserver,
    ) -> Result<Option<ParticipantId>> {
        loop {
            let mut guard = match self.store.lock_existing(id).await {
                Ok(guard) => guard,
                Err(PairError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            };

            let partner = match (guard.state, guard.partner_id.clone()) {
                (ParticipantState::Paired, Some(partner)) => partner,
                (ParticipantState::Seeking, _) if withdraw => {
                    guard.reset();
                    self.store.commit(&mut guard).await?;
                    tracing::debug!(participant = %id, "Withdrawn from queue");
                    return Ok(None);
                }
                (ParticipantState::Paired, None) => {
                    tracing::error!(participant = %id, "Paired without partner, forcing reset");
                    guard.reset();
                    self.store.commit(&mut guard).await?;
                    return Ok(None);
                }
                _ => return Ok(None),
            };
            drop(guard);

            let (mut mine, mut theirs) = match self.store.lock_pair(id, &partner).await {
                Ok(guards) => guards,
                Err(PairError::NotFound(_)) | Err(PairError::InconsistentPairState { .. }) => {
                    self.reset_dangling(id, &partner).await?;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            if !mine.is_paired_with(&partner) {
                // Changed while unlocked; start over from the fresh state
                continue;
            }

            if !theirs.is_paired_with(id) {
                // Only the detector is reset unconditionally. The partner is
                // reset only when it points back here; one validly paired
                // elsewhere (or Seeking) keeps its state. See DESIGN.md D4.
                let violation = PairError::InconsistentPairState {
                    participant: id.clone(),
                    partner: partner.clone(),
                };
                tracing::error!(
                    error = %violation,
                    partner_state = %theirs.state,
                    "Integrity violation, forcing reset"
                );
                mine.reset();
                self.store.commit(&mut mine).await?;
                if theirs.partner_id.as_ref() == Some(id) {
                    theirs.reset();
                    self.store.commit(&mut theirs).await?;
                }
                return Ok(None);
            }

            mine.reset();
            theirs.reset();
            self.commit_both(&mut mine, &mut theirs).await?;
            observer.dissolved(id, &partner);

            tracing::info!(participant = %id, partner = %partner, "Pair dissolved");
            return Ok(Some(partner));
        }
    }

    /// Reset a participant whose partner record is missing
    async fn reset_dangling(&self, id: &ParticipantId, partner: &ParticipantId) -> Result<()> {
        let mut guard = self.store.lock(id).await?;
        if guard.partner_id.as_ref() == Some(partner) {
            let violation = PairError::InconsistentPairState {
                participant: id.clone(),
                partner: partner.clone(),
            };
            tracing::error!(error = %violation, "Partner record missing, forcing reset");
            guard.reset();
            self.store.commit(&mut guard).await?;
        }
        Ok(())
    }

    /// Commit both sides; both are indexed even if the first save fails
    async fn commit_both(&self, a: &mut RecordGuard, b: &mut RecordGuard) -> Result<()> {
        let first = self.store.commit(a).await;
        let second = self.store.commit(b).await;
        first.and(second)
    }
}
