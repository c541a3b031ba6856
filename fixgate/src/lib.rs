/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixgate
//!
//! A FIX protocol gateway engine for Rust.
//!
//! Fixgate multiplexes live and replay FIX traffic onto persistent TCP
//! connections under partial-write back-pressure, with slow-consumer
//! protection and a single-threaded cooperative framer loop.
//!
//! ## Features
//!
//! - **Two-stream multiplexing**: live and replay traffic share one socket
//!   with FIFO order preserved within each stream
//! - **Back-pressure aware**: partial writes are checkpointed and retried;
//!   slow consumers are detected by backlog size and write deadline
//! - **Non-blocking**: one cooperative framer task drives every endpoint,
//!   built on Tokio
//! - **Observable**: lock-free published counters and structured logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fixgate::prelude::*;
//!
//! let (bus, events) = BusPublication::new(1024);
//! let (mut framer, handle) = Framer::new(
//!     EngineConfig::new().with_max_bytes_in_buffer(1 << 20),
//!     std::sync::Arc::new(bus),
//!     std::sync::Arc::new(LoggingErrorHandler),
//!     None,
//! );
//! let connection_id = framer.on_connection(
//!     Box::new(SocketChannel::new(stream)?),
//!     LibraryId::new(1),
//!     ConnectionKind::Fix,
//! );
//! tokio::spawn(framer.run());
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: identity types, counters, and error definitions
//! - [`codec`]: tag=value encoding and inbound wire framing
//! - [`engine`]: sender endpoints, framer loop, and flow control

pub mod core {
    //! Identity types, counters, and error definitions.
    pub use fixgate_core::*;
}

pub mod codec {
    //! Tag=value encoding and inbound wire framing.
    pub use fixgate_codec::*;
}

pub mod engine {
    //! Sender endpoints, framer loop, and flow control.
    pub use fixgate_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use fixgate_core::{
        CompId, ConfigError, ConnectionId, Counter, DisconnectReason, ErrorHandler, GatewayError,
        LibraryId, LoggingErrorHandler, Result, SessionId, SessionKey, Timestamp,
    };

    // Codec
    pub use fixgate_codec::{Encoder, FixFramer, FramingError, calculate_checksum};

    // Engine
    pub use fixgate_engine::{
        Action, BusPublication, ConnectionKind, EngineConfig, EngineEvent, FixSenderEndpoint,
        Framer, FramerCommand, FramerHandle, InboundPublication, MessageTimingHandler,
        NOT_LAST_REPLAY_MSG, SenderEndpoint, SocketChannel, TcpChannel,
    };
}
