/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Identity and time types for the gateway engine.
//!
//! This module provides the fundamental identifiers used throughout fixgate:
//! - [`ConnectionId`]: stable identity of one TCP connection
//! - [`LibraryId`]: identity of the client library owning a connection
//! - [`SessionId`] / [`SessionKey`]: FIX session identity, fixed at logon
//! - [`Timestamp`]: epoch-based wall clock with FIX formatting
//! - [`DisconnectReason`]: why a connection was torn down

use arrayvec::ArrayString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for CompID strings in bytes.
pub const COMP_ID_MAX_LEN: usize = 32;

/// Stable identifier of one TCP connection to a counterparty.
///
/// Assigned by the framer when the connection is accepted or initiated and
/// never reused for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection identifier from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a client library attached to the gateway.
///
/// A library owns the session logic for one or more connections. Submissions
/// carrying a library id other than the one a connection is bound to are
/// dropped, so a stale library cannot inject into a reassigned connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct LibraryId(i32);

impl LibraryId {
    /// Creates a library identifier from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for LibraryId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical FIX session, assigned once at logon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Session id used before a logon has established one.
    pub const UNKNOWN: Self = Self(0);

    /// Creates a session identifier from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Component identifier for FIX sessions.
///
/// Used for SenderCompID (tag 49), TargetCompID (tag 56), and related fields.
/// Maximum length is 32 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CompId(ArrayString<COMP_ID_MAX_LEN>);

impl CompId {
    /// Creates a new CompId from a string slice.
    ///
    /// # Returns
    /// `Some(CompId)` if the string fits within the maximum length, `None` otherwise.
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the CompId as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for CompId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key identifying the two parties of a FIX session.
///
/// Installed on an endpoint exactly once, at logon, together with the
/// [`SessionId`]. The sender endpoint needs it to stamp synthetic messages
/// (throttle rejects) with the session's comp ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// BeginString of the session (e.g. "FIX.4.4").
    pub begin_string: String,
    /// Our CompID (tag 49 on outbound messages).
    pub sender_comp_id: CompId,
    /// Counterparty CompID (tag 56 on outbound messages).
    pub target_comp_id: CompId,
}

impl SessionKey {
    /// Creates a new session key.
    #[must_use]
    pub fn new(
        begin_string: impl Into<String>,
        sender_comp_id: CompId,
        target_comp_id: CompId,
    ) -> Self {
        Self {
            begin_string: begin_string.into(),
            sender_comp_id,
            target_comp_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.begin_string, self.sender_comp_id, self.target_comp_id
        )
    }
}

/// Wall-clock timestamp with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since Unix epoch (1970-01-01 00:00:00 UTC).
    millis_since_epoch: u64,
}

impl Timestamp {
    /// Creates a timestamp from milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            millis_since_epoch: millis,
        }
    }

    /// Returns the current UTC timestamp.
    #[inline]
    #[must_use]
    pub fn now() -> Self {
        let dt = Utc::now();
        Self {
            millis_since_epoch: dt.timestamp_millis().max(0) as u64,
        }
    }

    /// Returns milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.millis_since_epoch
    }

    /// Converts to a chrono `DateTime<Utc>`.
    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch as i64).unwrap_or_default()
    }

    /// Formats the timestamp as a FIX SendingTime value.
    ///
    /// Format: `YYYYMMDD-HH:MM:SS.sss`
    #[must_use]
    pub fn format_millis(self) -> ArrayString<21> {
        let dt = self.to_datetime();
        let mut buf = ArrayString::new();
        let _ = std::fmt::write(
            &mut buf,
            format_args!("{}", dt.format("%Y%m%d-%H:%M:%S%.3f")),
        );
        buf
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_millis())
    }
}

/// Why a connection was torn down.
///
/// The sender endpoint itself only ever emits [`SlowConsumer`](Self::SlowConsumer)
/// and [`Exception`](Self::Exception); the other reasons originate in the
/// receive path or in administrative commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The peer's receive window drained slower than we produce for too long.
    SlowConsumer,
    /// An I/O or invariant fault made the connection unusable.
    Exception,
    /// The peer closed the TCP connection.
    RemoteDisconnect,
    /// The owning library requested the disconnect.
    LibraryDisconnect,
    /// The engine is shutting down.
    EngineShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SlowConsumer => "slow consumer",
            Self::Exception => "exception",
            Self::RemoteDisconnect => "remote disconnect",
            Self::LibraryDisconnect => "library disconnect",
            Self::EngineShutdown => "engine shutdown",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id() {
        let id = ConnectionId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(ConnectionId::from(42), id);
    }

    #[test]
    fn test_library_id_is_signed() {
        let id = LibraryId::new(-1);
        assert_eq!(id.value(), -1);
        assert_ne!(id, LibraryId::new(1));
    }

    #[test]
    fn test_session_id_unknown() {
        assert_eq!(SessionId::UNKNOWN.value(), 0);
        assert_ne!(SessionId::new(7), SessionId::UNKNOWN);
    }

    #[test]
    fn test_comp_id_too_long() {
        let long = "A".repeat(COMP_ID_MAX_LEN + 1);
        assert!(CompId::new(&long).is_none());
        assert_eq!(CompId::new("SENDER").unwrap().as_str(), "SENDER");
    }

    #[test]
    fn test_session_key_display() {
        let key = SessionKey::new(
            "FIX.4.4",
            CompId::new("GATEWAY").unwrap(),
            CompId::new("BROKER").unwrap(),
        );
        assert_eq!(key.to_string(), "FIX.4.4:GATEWAY->BROKER");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Timestamp::from_millis(0);
        assert!(ts.format_millis().starts_with("19700101-00:00:00"));
        assert_eq!(ts.as_millis(), 0);
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::SlowConsumer.to_string(), "slow consumer");
        assert_eq!(DisconnectReason::Exception.to_string(), "exception");
    }
}
