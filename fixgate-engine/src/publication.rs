/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! The shared inbound message bus seam.
//!
//! Endpoints publish session-relevant events (framed inbound messages,
//! replay completion, slow-consumer transitions, disconnects) toward the
//! owning library through an [`InboundPublication`]. The bus may be
//! back-pressured: [`Action::Abort`] tells the caller to buffer and retry,
//! which is how a replay-complete signal survives a full queue.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use fixgate_core::{ConnectionId, DisconnectReason, LibraryId};

/// Outcome of publishing to the inbound bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The event was accepted.
    Continue,
    /// The bus is back-pressured; the caller must retry later.
    Abort,
}

/// Publisher side of the shared inbound message bus.
///
/// Implementations must be non-blocking; every method is invoked from the
/// framer thread mid-tick.
pub trait InboundPublication: Send + Sync {
    /// Publishes one framed inbound FIX message.
    fn on_message(&self, connection_id: ConnectionId, message: Bytes) -> Action;

    /// Signals that a replay burst has completed end-to-end.
    fn on_replay_complete(&self, connection_id: ConnectionId, correlation_id: u64) -> Action;

    /// Signals a slow/not-slow consumer transition. Best-effort.
    fn on_slow_status(&self, library_id: LibraryId, connection_id: ConnectionId, slow: bool);

    /// Signals that a connection has been torn down. Best-effort.
    fn on_disconnect(
        &self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    );
}

/// Events delivered on the shared bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A framed inbound FIX message.
    Message {
        /// Connection the message arrived on.
        connection_id: ConnectionId,
        /// The complete framed message bytes.
        message: Bytes,
    },
    /// A replay burst finished draining.
    ReplayComplete {
        /// Connection the replay ran on.
        connection_id: ConnectionId,
        /// Identity of the completed burst.
        correlation_id: u64,
    },
    /// A connection became slow or recovered.
    SlowStatus {
        /// Library owning the connection.
        library_id: LibraryId,
        /// Connection that transitioned.
        connection_id: ConnectionId,
        /// True when the connection became slow.
        slow: bool,
    },
    /// A connection was torn down.
    Disconnect {
        /// Library owning the connection.
        library_id: LibraryId,
        /// Connection that was removed.
        connection_id: ConnectionId,
        /// Why it was removed.
        reason: DisconnectReason,
    },
}

/// [`InboundPublication`] over a bounded channel.
///
/// A full queue yields [`Action::Abort`] for the signals that must not be
/// lost and silently drops best-effort notifications.
#[derive(Debug, Clone)]
pub struct BusPublication {
    events: Sender<EngineEvent>,
}

impl BusPublication {
    /// Creates a bus with the given capacity, returning the publisher and
    /// the consumer end handed to the library side.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let (events, consumer) = bounded(capacity);
        (Self { events }, consumer)
    }

    fn try_publish(&self, event: EngineEvent) -> Action {
        match self.events.try_send(event) {
            Ok(()) => Action::Continue,
            Err(TrySendError::Full(_)) => Action::Abort,
            // Nobody is listening; retrying would never succeed.
            Err(TrySendError::Disconnected(_)) => Action::Continue,
        }
    }
}

impl InboundPublication for BusPublication {
    fn on_message(&self, connection_id: ConnectionId, message: Bytes) -> Action {
        self.try_publish(EngineEvent::Message {
            connection_id,
            message,
        })
    }

    fn on_replay_complete(&self, connection_id: ConnectionId, correlation_id: u64) -> Action {
        self.try_publish(EngineEvent::ReplayComplete {
            connection_id,
            correlation_id,
        })
    }

    fn on_slow_status(&self, library_id: LibraryId, connection_id: ConnectionId, slow: bool) {
        if self.try_publish(EngineEvent::SlowStatus {
            library_id,
            connection_id,
            slow,
        }) == Action::Abort
        {
            tracing::debug!(%connection_id, slow, "bus full, slow status dropped");
        }
    }

    fn on_disconnect(
        &self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) {
        if self.try_publish(EngineEvent::Disconnect {
            library_id,
            connection_id,
            reason,
        }) == Action::Abort
        {
            tracing::debug!(%connection_id, %reason, "bus full, disconnect event dropped");
        }
    }
}
