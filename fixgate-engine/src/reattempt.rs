/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Growable byte arenas holding frames awaiting a write retry.
//!
//! Each sender endpoint keeps one arena per outbound stream (normal and
//! replay). Bytes `[0, usage)` are always a concatenation of well-formed
//! records; draining consumes records from offset 0 and compacts the
//! remainder down with [`ReattemptBuffer::shuffle`]. Arenas grow
//! monotonically and never shrink until the endpoint closes, only compact.

use bytes::BytesMut;

/// Record tag: a buffered outbound message.
pub(crate) const ENQ_MESSAGE: u32 = 1;
/// Record tag: a replay burst completion marker.
pub(crate) const ENQ_REPLAY_COMPLETE: u32 = 2;
/// Record tag: a replay burst start marker.
pub(crate) const ENQ_START_REPLAY: u32 = 3;

/// Length of a correlation record (`tag:u32 | correlation_id:u64`).
pub(crate) const ENQ_CORRELATION_LEN: usize = 4 + 8;

/// Fixed overhead of a message record
/// (`tag:u32 | seq:u32 | body_len:u32 | body | meta_len:u32 | meta`).
pub(crate) const ENQ_MESSAGE_BLOCK_LEN: usize = 4 * 4;

/// Growable arena of buffered, not-yet-written records for one stream.
#[derive(Debug, Default)]
pub struct ReattemptBuffer {
    bytes: BytesMut,
}

impl ReattemptBuffer {
    /// Number of valid bytes from offset 0.
    #[inline]
    #[must_use]
    pub fn usage(&self) -> usize {
        self.bytes.len()
    }

    /// Extends the arena by `len` zeroed bytes, returning the offset the
    /// caller should write its record at.
    pub fn reserve_append(&mut self, len: usize) -> usize {
        let offset = self.bytes.len();
        self.bytes.resize(offset + len, 0);
        offset
    }

    /// Writes a big-endian u32 at `offset`.
    #[inline]
    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian u64 at `offset`.
    #[inline]
    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }

    /// Copies `src` into the arena at `offset`.
    #[inline]
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) {
        self.bytes[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Reads a big-endian u32 at `offset`.
    #[inline]
    #[must_use]
    pub fn get_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_be_bytes(raw)
    }

    /// Reads a big-endian u64 at `offset`.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, offset: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[offset..offset + 8]);
        u64::from_be_bytes(raw)
    }

    /// Borrows `len` bytes starting at `offset`.
    #[inline]
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }

    /// Discards the first `written` bytes, compacting the remainder to
    /// offset 0. Returns the new usage. A `written` of 0 is a no-op.
    pub fn shuffle(&mut self, written: usize) -> usize {
        if written > 0 {
            let usage = self.bytes.len() - written;
            self.bytes.copy_within(written.., 0);
            self.bytes.truncate(usage);
        }
        self.bytes.len()
    }
}

/// Lazily allocated reattempt arena for one stream.
///
/// The common case is an empty backlog, so the arena is only materialized on
/// the first buffered record.
#[derive(Debug, Default)]
pub struct ReattemptState {
    buffer: Option<ReattemptBuffer>,
}

impl ReattemptState {
    /// Number of valid buffered bytes; 0 when never allocated.
    #[inline]
    #[must_use]
    pub fn usage(&self) -> usize {
        self.buffer.as_ref().map_or(0, ReattemptBuffer::usage)
    }

    /// Returns the arena, allocating it on first use.
    pub fn buffer(&mut self) -> &mut ReattemptBuffer {
        self.buffer.get_or_insert_with(ReattemptBuffer::default)
    }

    /// Whether a buffer was ever allocated.
    #[inline]
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Releases the arena's memory.
    pub fn release(&mut self) {
        self.buffer = None;
    }
}
