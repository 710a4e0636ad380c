//! Session controller
//!
//! Maps classified inbound events onto engine and relay calls and emits the
//! resulting notifications through the outbox. `handle` is the entry point
//! for transports: it never fails, errors are logged.
//!
//! Pair notices ("connected", "partner left") are enqueued from engine hooks
//! while both records are locked, so a partner never sees a relayed message
//! ahead of the notice that announced the pair.

use crate::classify::{CommandClassifier, InboundEvent};
use crate::config::{CommandConfig, MessageTemplates, PairConfig};
use crate::engine::{MatchEngine, PairObserver, PairingOutcome};
use crate::error::Result;
use crate::outbox::{Outbound, Outbox};
use crate::relay::{RelayOutcome, RelaySession};
use crate::transport::Keyboard;
use crate::types::{ParticipantId, ParticipantState};
use std::sync::Arc;

/// Routes inbound events for every participant
pub struct SessionController {
    engine: Arc<MatchEngine>,
    relay: RelaySession,
    outbox: Outbox,
    classifier: CommandClassifier,
    commands: CommandConfig,
    messages: MessageTemplates,
}

impl SessionController {
    pub fn new(engine: Arc<MatchEngine>, outbox: Outbox, config: &PairConfig) -> Self {
        Self {
            relay: RelaySession::new(engine.clone(), outbox.clone()),
            engine,
            outbox,
            classifier: CommandClassifier::from_config(&config.commands),
            commands: config.commands.clone(),
            messages: config.messages.clone(),
        }
    }

    /// Get a reference to the engine
    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Classify a raw payload and handle it
    pub async fn handle_payload(&self, id: &ParticipantId, payload: &str) {
        let event = self.classifier.classify(payload);
        self.handle(id, event).await;
    }

    /// Handle one inbound event; failures are logged, never returned
    pub async fn handle(&self, id: &ParticipantId, event: InboundEvent) {
        let (kind, result) = match event {
            InboundEvent::Join => ("join", self.on_join(id).await),
            InboundEvent::Seek => ("seek", self.on_seek(id).await),
            InboundEvent::Exit => ("exit", self.on_exit(id).await),
            InboundEvent::Message(text) => ("message", self.on_message(id, &text).await),
        };

        if let Err(e) = result {
            tracing::error!(participant = %id, event = kind, error = %e, "Failed to handle event");
        }
    }

    /// Register the participant and greet it
    pub async fn on_join(&self, id: &ParticipantId) -> Result<()> {
        let participant = self.engine.register(id).await?;
        let keyboard = match participant.state {
            ParticipantState::Paired => Keyboard::Exit,
            _ => Keyboard::Main,
        };
        self.notify(id, &self.messages.welcome, keyboard);
        Ok(())
    }

    /// Request a partner
    pub async fn on_seek(&self, id: &ParticipantId) -> Result<()> {
        let report = self.engine.request_pairing_observed(id, self).await?;

        match report.outcome {
            PairingOutcome::Paired(_) => {}
            PairingOutcome::Waiting => {
                self.notify(id, &self.messages.waiting, Keyboard::Exit);
            }
            PairingOutcome::AlreadyPaired(partner) => {
                tracing::debug!(participant = %id, partner = %partner, "Seek raced with a match");
            }
            PairingOutcome::Withdrawn => {
                tracing::debug!(participant = %id, "Left the queue during seek");
            }
        }
        Ok(())
    }

    /// Leave the current chat or queue
    pub async fn on_exit(&self, id: &ParticipantId) -> Result<()> {
        self.notify(id, &self.messages.exit_ack, Keyboard::Main);
        self.engine.leave_observed(id, self).await?;
        Ok(())
    }

    /// Relay a plain message; the sender never gets a reply
    pub async fn on_message(&self, id: &ParticipantId, text: &str) -> Result<()> {
        match self.relay.relay(id, text).await? {
            RelayOutcome::Delivered(partner) => {
                tracing::trace!(participant = %id, partner = %partner, "Relayed");
            }
            RelayOutcome::Dropped(reason) => {
                tracing::debug!(participant = %id, ?reason, "Message dropped");
            }
        }
        Ok(())
    }

    fn notify(&self, to: &ParticipantId, text: &str, keyboard: Keyboard) {
        self.outbox
            .send(Outbound::text(to.clone(), text).with_hints(keyboard.hints(&self.commands)));
    }
}

impl PairObserver for SessionController {
    fn paired(&self, requester: &ParticipantId, partner: &ParticipantId) {
        self.notify(
            partner,
            &self.messages.connected_to(requester.as_str()),
            Keyboard::Exit,
        );
        self.notify(
            requester,
            &self.messages.connected_to(partner.as_str()),
            Keyboard::Exit,
        );
    }

    fn dissolved(&self, _initiator: &ParticipantId, former: &ParticipantId) {
        self.notify(former, &self.messages.partner_left, Keyboard::Main);
    }
}
