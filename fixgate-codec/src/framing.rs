/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Inbound FIX wire framing.
//!
//! Reassembles a TCP byte stream into whole FIX messages by parsing
//! BeginString (8) and BodyLength (9), then slicing off
//! `header + body + trailer`. Checksum validation is optional; gateways that
//! archive raw inbound bytes typically leave verification to the session
//! layer.

use bytes::BytesMut;
use memchr::memchr;
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::checksum::{calculate_checksum, parse_checksum};

/// SOH delimiter.
const SOH: u8 = 0x01;

/// Length of the `10=XXX|` trailer.
const TRAILER_LEN: usize = 7;

/// Errors produced while reassembling inbound FIX messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Stream does not start with `8=`.
    #[error("invalid begin string: message must start with 8=")]
    InvalidBeginString,

    /// BodyLength field (tag 9) missing after BeginString.
    #[error("missing body length field (tag 9)")]
    MissingBodyLength,

    /// BodyLength value is not a valid integer.
    #[error("invalid body length value")]
    InvalidBodyLength,

    /// Declared and calculated checksums disagree.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Checksum calculated over the received bytes.
        calculated: u8,
        /// Checksum declared in the message trailer.
        declared: u8,
    },

    /// Message exceeds the configured maximum size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Total message size implied by BodyLength.
        size: usize,
        /// Configured maximum.
        max_size: usize,
    },

    /// I/O error from the underlying stream.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FramingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Stream reassembler for inbound FIX messages.
#[derive(Debug, Clone)]
pub struct FixFramer {
    /// Maximum message size in bytes.
    max_message_size: usize,
    /// Whether to validate checksums.
    validate_checksum: bool,
}

impl FixFramer {
    /// Creates a framer with default settings (1 MiB cap, checksums verified).
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            validate_checksum: true,
        }
    }

    /// Sets the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets whether to validate checksums.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }
}

impl Default for FixFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FixFramer {
    type Item = BytesMut;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Shortest legal message: 8=FIX.x.y|9=n|35=X|10=XXX|
        if src.len() < 20 {
            return Ok(None);
        }

        if &src[0..2] != b"8=" {
            return Err(FramingError::InvalidBeginString);
        }

        let Some(first_soh) = memchr(SOH, src) else {
            return Ok(None);
        };

        let body_len_start = first_soh + 1;
        if src.len() < body_len_start + 3 {
            return Ok(None);
        }
        if &src[body_len_start..body_len_start + 2] != b"9=" {
            return Err(FramingError::MissingBodyLength);
        }

        let Some(rel_soh) = memchr(SOH, &src[body_len_start..]) else {
            return Ok(None);
        };
        let body_len_soh = body_len_start + rel_soh;

        let body_length: usize = std::str::from_utf8(&src[body_len_start + 2..body_len_soh])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FramingError::InvalidBodyLength)?;

        // BodyLength counts the bytes between its own SOH and the trailer.
        let total_length = body_len_soh + 1 + body_length + TRAILER_LEN;
        if total_length > self.max_message_size {
            return Err(FramingError::MessageTooLarge {
                size: total_length,
                max_size: self.max_message_size,
            });
        }

        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        if self.validate_checksum {
            let checksum_field_start = total_length - TRAILER_LEN;
            let declared = parse_checksum(&src[checksum_field_start + 3..checksum_field_start + 6])
                .ok_or(FramingError::InvalidBodyLength)?;
            let calculated = calculate_checksum(&src[..checksum_field_start]);

            if calculated != declared {
                return Err(FramingError::ChecksumMismatch {
                    calculated,
                    declared,
                });
            }
        }

        Ok(Some(src.split_to(total_length)))
    }
}
