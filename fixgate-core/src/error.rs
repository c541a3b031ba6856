/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Error types and the error sink seam for the fixgate engine.
//!
//! Faults inside the engine are *reported*, not propagated: every endpoint
//! holds an injected [`ErrorHandler`] and converts faults into disconnects,
//! so callers of endpoint methods never observe errors directly. Lower-layer
//! errors are carried as typed sources, not rendered strings.

use crate::types::ConnectionId;
use fixgate_codec::FramingError;
use thiserror::Error;

/// Result type alias using [`GatewayError`] as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for gateway engine faults.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error from a connection's socket.
    #[error("io error on connection {connection_id}: {source}")]
    Io {
        /// Connection the fault occurred on.
        connection_id: ConnectionId,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Inbound bytes could not be reassembled into a FIX message.
    #[error("framing error on connection {connection_id}: {source}")]
    Framing {
        /// Connection the malformed bytes arrived on.
        connection_id: ConnectionId,
        /// The framing failure, with its structured detail intact.
        #[source]
        source: FramingError,
    },

    /// A reattempt buffer contained a record with an unknown tag.
    ///
    /// This indicates buffer corruption; the endpoint abandons the drain and
    /// the framer closes the connection.
    #[error(
        "unknown reattempt record tag {tag} on connection {connection_id} \
         (offset {offset}, usage {usage}, replay {replay})"
    )]
    UnknownReattemptTag {
        /// Connection whose buffer is corrupt.
        connection_id: ConnectionId,
        /// The tag value that was read.
        tag: u32,
        /// Buffer offset the tag was read at.
        offset: usize,
        /// Valid bytes in the buffer at the time.
        usage: usize,
        /// Whether this was the replay-stream buffer.
        replay: bool,
    },

    /// A message could not be built because required configuration is missing.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Errors in engine configuration and synthetic message construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A throttle reject was requested before logon installed the session
    /// key it is stamped with.
    #[error("throttle reject dropped before logon on connection {connection_id}")]
    SessionKeyMissing {
        /// Connection the reject was requested for.
        connection_id: ConnectionId,
    },
}

/// Synchronous sink for engine faults.
///
/// Implementations must not block; they are invoked from the framer thread
/// in the middle of endpoint processing.
pub trait ErrorHandler: Send + Sync {
    /// Reports a fault. The engine continues (or disconnects) on its own.
    fn on_error(&self, error: &GatewayError);
}

/// Default error sink that logs faults through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn on_error(&self, error: &GatewayError) {
        tracing::error!(%error, "engine fault");
    }
}
