/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixgate Engine
//!
//! The gateway engine: per-connection sender endpoints that multiplex live
//! and replay traffic onto non-blocking TCP sockets, the framer event loop
//! that drives them, and the flow-control policy that protects the engine
//! from slow consumers.
//!
//! ## Architecture
//!
//! One framer task owns every endpoint and invokes them sequentially; no
//! endpoint method blocks or suspends. Outbound messages either go straight
//! to the socket or are parked in per-stream reattempt buffers and drained
//! on later ticks, preserving FIFO order within each stream. The only state
//! read off the framer thread is the published counters.
//!
//! ## Seams
//!
//! The engine talks to the outside world through narrow traits:
//! [`TcpChannel`] (the socket), [`InboundPublication`] (the shared message
//! bus), [`MessageTimingHandler`] (per-message flush callbacks), and
//! `ErrorHandler` (the fault sink).

pub mod channel;
pub mod config;
pub mod fixp;
pub mod framer;
pub mod publication;
pub mod reattempt;
pub mod receiver;
pub mod sender;
pub mod throttle;
pub mod timing;

#[cfg(test)]
pub(crate) mod stubs;

pub use channel::{SocketChannel, TcpChannel};
pub use config::EngineConfig;
pub use fixp::FixpSenderEndpoint;
pub use framer::{ConnectionKind, Framer, FramerCommand, FramerHandle};
pub use publication::{Action, BusPublication, EngineEvent, InboundPublication};
pub use reattempt::{ReattemptBuffer, ReattemptState};
pub use receiver::FixReceiverEndpoint;
pub use sender::{FixSenderEndpoint, NOT_LAST_REPLAY_MSG, SenderEndpoint};
pub use throttle::{THROTTLE_BUSINESS_REJECT_REASON, ThrottleRejectBuilder};
pub use timing::MessageTimingHandler;
