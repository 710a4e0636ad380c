//! # a3s-pair
//!
//! Anonymous one-to-one chat pairing for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-pair` puts participants who ask for a partner into a queue, pairs
//! two of them at a time, relays their messages to each other and tears the
//! pair down when either side leaves. Participant state survives restarts
//! through a pluggable record store, and all outbound traffic goes through a
//! fire-and-forget queue drained by a single dispatcher.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_pair::{
//!     Dispatcher, InboundEvent, MatchEngine, MemoryTransport, Outbox, PairConfig,
//!     ParticipantStore, SessionController,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_pair::Result<()> {
//! let config = PairConfig::default();
//! let engine = Arc::new(MatchEngine::new(Arc::new(ParticipantStore::in_memory())));
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let (outbox, rx) = Outbox::channel();
//! let dispatcher = Dispatcher::spawn(rx, transport.clone());
//!
//! let controller = SessionController::new(engine, outbox, &config);
//! controller.handle(&"alice".into(), InboundEvent::Seek).await;
//! controller.handle(&"bob".into(), InboundEvent::Seek).await;
//! controller.handle_payload(&"alice".into(), "hi bob").await;
//!
//! drop(controller);
//! let _ = dispatcher.await;
//! assert_eq!(transport.delivered_to(&"bob".into()).last().unwrap().text, "hi bob");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **ParticipantStore**: per-participant records with a Seeking index
//! - **RecordStore** trait: durable backend (file or in-memory)
//! - **MatchEngine**: forms and dissolves pairs atomically
//! - **RelaySession**: forwards messages between partners
//! - **SessionController**: maps join / seek / exit / message to the above
//! - **Transport** trait: delivers text to a participant's device

pub mod classify;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod persist;
pub mod relay;
pub mod store;
pub mod transport;
pub mod types;

// Re-export core types
pub use classify::{CommandClassifier, InboundEvent};
pub use config::{CommandConfig, MessageTemplates, PairConfig};
pub use controller::SessionController;
pub use engine::{
    MatchEngine, PairObserver, PairingOutcome, PairingReport, DEFAULT_MAX_MATCH_ATTEMPTS,
};
pub use error::{PairError, Result};
pub use outbox::{Dispatcher, Outbound, Outbox};
pub use persist::{FileRecordStore, MemoryRecordStore, RecordStore};
pub use relay::{DropReason, RelayOutcome, RelaySession};
pub use store::ParticipantStore;
pub use transport::{
    emojize, Delivered, Keyboard, MemoryTransport, PresentationHints, StdioTransport, Transport,
};
pub use types::{Participant, ParticipantId, ParticipantState, StateCounts};
