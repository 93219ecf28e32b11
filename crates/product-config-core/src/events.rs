//! Controller notification surface.
//!
//! Listener callbacks are modelled as a typed event enum pushed through an
//! unbounded channel. The host drains the receiver on whatever task it
//! considers its caller-visible thread, which keeps delivery single-threaded
//! from the application's point of view. Each operation instance emits its
//! event at most once.

use tokio::sync::mpsc;
use tracing::debug;

/// Discrete notifications emitted by the configuration controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    /// Initialization completed and the activated tier is readable.
    InitSuccess,
    /// Initialization failed; the operation may be retried.
    InitFailed,
    /// A fetch attempt finished (successfully parsed or not).
    Fetched,
    /// A fetched snapshot was folded into the activated tier.
    Activated,
}

/// Receiving half handed to the embedding application.
pub type EventStream = mpsc::UnboundedReceiver<ConfigEvent>;

/// Sending half owned by the controller internals.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<ConfigEvent>,
}

impl EventSink {
    /// Creates a connected sink/stream pair.
    pub(crate) fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event; a closed receiver only downgrades to a debug log.
    pub(crate) fn emit(&self, event: ConfigEvent) {
        if self.tx.send(event).is_err() {
            debug!("dropping {event:?}: event stream receiver is gone");
        }
    }
}
