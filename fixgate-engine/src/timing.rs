/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-message timing callback seam.

use fixgate_core::ConnectionId;

/// Receives one callback per outbound message whose body has been fully
/// flushed to the socket.
///
/// Fired exactly once per live (non-replay) message, in submission order,
/// after the last byte of the body was accepted by the channel. Replayed
/// messages never fire it. The metadata bytes are whatever the library
/// attached to the message at submission time.
pub trait MessageTimingHandler: Send + Sync {
    /// Called once when a message is fully on the wire.
    fn on_message(&self, seq_num: u32, connection_id: ConnectionId, metadata: &[u8]);
}
