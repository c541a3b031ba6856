/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-connection receiver endpoints.
//!
//! The receiver owns the inbound half of a connection: it drains available
//! bytes from the channel, reassembles them into whole FIX messages, and
//! forwards each onto the shared bus. Session logic (sequence validation,
//! logon handling) lives library-side; here the receiver's other job is the
//! disconnect hook: peer closes and read faults are recorded for the framer
//! to route, coordinated with the sender sibling.

use std::sync::Arc;

use bytes::BytesMut;
use fixgate_core::{ConnectionId, DisconnectReason, ErrorHandler, GatewayError, LibraryId};
use fixgate_codec::FixFramer;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::channel::TcpChannel;
use crate::config::EngineConfig;
use crate::publication::{Action, InboundPublication};

/// Receiver endpoint for one connection.
pub struct FixReceiverEndpoint {
    connection_id: ConnectionId,
    library_id: LibraryId,
    publication: Arc<dyn InboundPublication>,
    error_handler: Arc<dyn ErrorHandler>,
    framing: FixFramer,
    read_buffer: BytesMut,
    pending_disconnect: Option<DisconnectReason>,
}

impl FixReceiverEndpoint {
    /// Creates a receiver for `connection_id`.
    pub fn new(
        connection_id: ConnectionId,
        library_id: LibraryId,
        publication: Arc<dyn InboundPublication>,
        error_handler: Arc<dyn ErrorHandler>,
        config: &EngineConfig,
    ) -> Self {
        let framing = FixFramer::new()
            .with_max_message_size(config.max_inbound_message_size())
            .with_checksum_validation(config.validate_checksums());
        Self {
            connection_id,
            library_id,
            publication,
            error_handler,
            framing,
            read_buffer: BytesMut::new(),
            pending_disconnect: None,
        }
    }

    /// Drains available inbound bytes and forwards whole messages to the bus.
    pub fn poll(&mut self, channel: &mut dyn TcpChannel, _now_ms: u64) {
        if self.pending_disconnect.is_some() {
            return;
        }

        loop {
            match channel.read_into(&mut self.read_buffer) {
                Ok(0) => {
                    debug!(connection_id = %self.connection_id, "peer closed connection");
                    self.request_disconnect(DisconnectReason::RemoteDisconnect);
                    return;
                }
                Ok(read) => {
                    trace!(connection_id = %self.connection_id, read, "inbound bytes");
                    if !self.dispatch_messages() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(source) => {
                    self.error_handler.on_error(&GatewayError::Io {
                        connection_id: self.connection_id,
                        source,
                    });
                    self.request_disconnect(DisconnectReason::Exception);
                    return;
                }
            }
        }
    }

    /// Records a disconnect request for the framer to route; the first
    /// reason wins.
    pub fn request_disconnect(&mut self, reason: DisconnectReason) {
        if self.pending_disconnect.is_none() {
            self.pending_disconnect = Some(reason);
        }
    }

    pub(crate) fn take_pending_disconnect(&mut self) -> Option<DisconnectReason> {
        self.pending_disconnect.take()
    }

    /// Owning library identity.
    #[must_use]
    pub fn library_id(&self) -> LibraryId {
        self.library_id
    }

    fn dispatch_messages(&mut self) -> bool {
        loop {
            match self.framing.decode(&mut self.read_buffer) {
                Ok(Some(message)) => {
                    trace!(
                        connection_id = %self.connection_id,
                        len = message.len(),
                        "inbound message"
                    );
                    if self.publication.on_message(self.connection_id, message.freeze())
                        == Action::Abort
                    {
                        // Bounded bus and the library is not keeping up; the
                        // message is lost to the bus but remains in archive.
                        warn!(
                            connection_id = %self.connection_id,
                            "inbound bus back-pressured, message dropped"
                        );
                    }
                }
                Ok(None) => return true,
                Err(source) => {
                    self.error_handler.on_error(&GatewayError::Framing {
                        connection_id: self.connection_id,
                        source,
                    });
                    self.request_disconnect(DisconnectReason::Exception);
                    return false;
                }
            }
        }
    }
}
