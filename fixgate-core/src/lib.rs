/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixgate Core
//!
//! Core types, counters, and error definitions for the fixgate FIX gateway
//! engine.
//!
//! This crate provides the building blocks shared by the fixgate crates:
//! - **Identity types**: `ConnectionId`, `LibraryId`, `SessionId`, `SessionKey`
//! - **Published counters**: lock-free metric cells with release/acquire
//!   publication, the only engine state read off the framer thread
//! - **Error types**: unified fault hierarchy with `thiserror`, plus the
//!   injected [`ErrorHandler`] sink

pub mod counters;
pub mod error;
pub mod types;

pub use counters::Counter;
pub use error::{ConfigError, ErrorHandler, GatewayError, LoggingErrorHandler, Result};
pub use types::{
    COMP_ID_MAX_LEN, CompId, ConnectionId, DisconnectReason, LibraryId, SessionId, SessionKey,
    Timestamp,
};
