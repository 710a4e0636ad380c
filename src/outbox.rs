//! Fire-and-forget outbound queue
//!
//! The core enqueues notifications and relayed messages on an `Outbox`
//! and returns immediately. A single `Dispatcher` task drains the queue
//! in FIFO order, so messages to the same destination arrive in the
//! order they were enqueued. Delivery failures are logged, never
//! surfaced to the caller.

use crate::transport::{PresentationHints, Transport};
use crate::types::ParticipantId;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One message waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ParticipantId,
    pub text: String,
    pub hints: PresentationHints,
}

impl Outbound {
    /// Plain text without presentation hints
    pub fn text(to: ParticipantId, text: impl Into<String>) -> Self {
        Self {
            to,
            text: text.into(),
            hints: PresentationHints::none(),
        }
    }

    /// Attach presentation hints
    pub fn with_hints(mut self, hints: PresentationHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Cloneable handle for enqueueing outbound messages
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    /// Create an outbox and the receiving end of its queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a message; never blocks
    pub fn send(&self, message: Outbound) {
        if let Err(e) = self.tx.send(message) {
            tracing::warn!(
                to = %e.0.to,
                "Outbox closed, dropping message"
            );
        }
    }
}

/// Drains an outbox queue into a transport
pub struct Dispatcher;

impl Dispatcher {
    /// Spawn the dispatch loop; it ends once every `Outbox` clone is dropped
    pub fn spawn(
        rx: mpsc::UnboundedReceiver<Outbound>,
        transport: Arc<dyn Transport>,
    ) -> JoinHandle<usize> {
        tokio::spawn(Self::run(rx, transport))
    }

    /// Run the dispatch loop to completion, returning the number of
    /// messages delivered successfully
    pub async fn run(rx: mpsc::UnboundedReceiver<Outbound>, transport: Arc<dyn Transport>) -> usize {
        let mut stream = UnboundedReceiverStream::new(rx);
        let mut delivered = 0;

        while let Some(message) = stream.next().await {
            match transport.send(&message.to, &message.text, &message.hints).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        transport = transport.name(),
                        to = %message.to,
                        error = %e,
                        "Failed to deliver message"
                    );
                }
            }
        }

        tracing::debug!(transport = transport.name(), delivered, "Dispatcher stopped");
        delivered
    }
}
