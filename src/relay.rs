//! Message relay between the two members of a pair

use crate::engine::MatchEngine;
use crate::error::{PairError, Result};
use crate::outbox::{Outbound, Outbox};
use crate::types::{ParticipantId, ParticipantState};
use std::sync::Arc;

/// Why a relayed message was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sender has no active partner
    NotPaired,
    /// Sender's partner did not point back; the pair was force-reset
    BrokenPair,
}

/// Result of relaying one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Enqueued for the partner
    Delivered(ParticipantId),
    /// Silently dropped
    Dropped(DropReason),
}

/// Forwards content from a Paired participant to its partner
pub struct RelaySession {
    engine: Arc<MatchEngine>,
    outbox: Outbox,
}

impl RelaySession {
    pub fn new(engine: Arc<MatchEngine>, outbox: Outbox) -> Self {
        Self { engine, outbox }
    }

    /// Relay `text` from `from` to its partner, unmodified
    ///
    /// The message is enqueued while both records are locked, so messages
    /// from one sender reach the outbox in the order they were relayed.
    pub async fn relay(&self, from: &ParticipantId, text: &str) -> Result<RelayOutcome> {
        let store = self.engine.store();

        let partner = match store.lock_existing(from).await {
            Ok(guard) if guard.state == ParticipantState::Paired => {
                match guard.partner_id.clone() {
                    Some(partner) => partner,
                    None => return Ok(RelayOutcome::Dropped(DropReason::NotPaired)),
                }
            }
            Ok(_) | Err(PairError::NotFound(_)) => {
                return Ok(RelayOutcome::Dropped(DropReason::NotPaired));
            }
            Err(e) => return Err(e),
        };

        let (mine, theirs) = match store.lock_pair(from, &partner).await {
            Ok(guards) => guards,
            Err(PairError::NotFound(_)) | Err(PairError::InconsistentPairState { .. }) => {
                self.engine.dissolve_pairing(from).await?;
                return Ok(RelayOutcome::Dropped(DropReason::BrokenPair));
            }
            Err(e) => return Err(e),
        };

        if !mine.is_paired_with(&partner) {
            // Pair dissolved between the two lookups
            return Ok(RelayOutcome::Dropped(DropReason::NotPaired));
        }

        if !theirs.is_paired_with(from) {
            drop((mine, theirs));
            tracing::warn!(
                participant = %from,
                partner = %partner,
                "Broken pair detected while relaying"
            );
            self.engine.dissolve_pairing(from).await?;
            return Ok(RelayOutcome::Dropped(DropReason::BrokenPair));
        }

        self.outbox.send(Outbound::text(partner.clone(), text));
        tracing::trace!(from = %from, to = %partner, "Message relayed");
        Ok(RelayOutcome::Delivered(partner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ParticipantStore;

    fn setup() -> (
        Arc<MatchEngine>,
        RelaySession,
        tokio::sync::mpsc::UnboundedReceiver<Outbound>,
    ) {
        let engine = Arc::new(MatchEngine::new(Arc::new(ParticipantStore::in_memory())));
        let (outbox, rx) = Outbox::channel();
        let relay = RelaySession::new(engine.clone(), outbox);
        (engine, relay, rx)
    }

    #[tokio::test]
    async fn test_relay_from_unpaired_sends_nothing() {
        let (engine, relay, mut rx) = setup();
        engine.register(&"idle".into()).await.unwrap();
        engine.request_pairing(&"seeker".into()).await.unwrap();

        for id in ["idle", "seeker", "unknown"] {
            let outcome = relay.relay(&id.into(), "hello").await.unwrap();
            assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotPaired));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_delivers_exactly_once_unmodified() {
        let (engine, relay, mut rx) = setup();
        engine.request_pairing(&"a".into()).await.unwrap();
        engine.request_pairing(&"b".into()).await.unwrap();

        let text = "  hi :wave: <b>there</b>  ";
        let outcome = relay.relay(&"a".into(), text).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Delivered("b".into()));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.to.as_str(), "b");
        assert_eq!(msg.text, text);
        assert!(msg.hints.quick_replies.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_preserves_order() {
        let (engine, relay, mut rx) = setup();
        engine.request_pairing(&"a".into()).await.unwrap();
        engine.request_pairing(&"b".into()).await.unwrap();

        for i in 0..10 {
            relay.relay(&"a".into(), &format!("{}", i)).await.unwrap();
        }
        let received: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.text)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_relay_detects_broken_pair() {
        let (engine, relay, mut rx) = setup();
        let store = engine.store();
        store.set_state(&"x".into(), ParticipantState::Paired).await.unwrap();
        store.set_partner(&"x".into(), Some("y".into())).await.unwrap();
        store.get(&"y".into()).await.unwrap();

        let outcome = relay.relay(&"x".into(), "hello").await.unwrap();
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::BrokenPair));
        assert!(rx.try_recv().is_err());

        let x = store.probe(&"x".into()).await.unwrap();
        assert_eq!(x.state, ParticipantState::Idle);
        assert!(x.partner_id.is_none());
    }

    #[tokio::test]
    async fn test_relay_after_dissolve_is_dropped() {
        let (engine, relay, mut rx) = setup();
        engine.request_pairing(&"a".into()).await.unwrap();
        engine.request_pairing(&"b".into()).await.unwrap();
        engine.leave(&"b".into()).await.unwrap();

        let outcome = relay.relay(&"a".into(), "anyone?").await.unwrap();
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotPaired));
        assert!(rx.try_recv().is_err());
    }
}
