/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! The socket seam between endpoints and the operating system.
//!
//! Endpoints never touch a socket type directly; they talk to a
//! [`TcpChannel`], which keeps the multiplexing logic deterministic and lets
//! tests script exact per-call write acceptance. [`SocketChannel`] is the
//! production implementation over a non-blocking tokio TCP stream.

use bytes::BytesMut;
use std::io;
use tokio::net::TcpStream;

/// How much spare read capacity is kept available per read call.
const READ_CHUNK: usize = 64 * 1024;

/// A non-blocking, bidirectional byte channel to a counterparty.
///
/// Write semantics: returns the number of bytes accepted, which may be less
/// than requested; `Ok(0)` is legal and means the send buffer is full.
///
/// Read semantics: `Ok(0)` means the peer closed the connection; an error of
/// kind [`io::ErrorKind::WouldBlock`] means no data is available right now.
pub trait TcpChannel: Send {
    /// Attempts to write `src`, returning the number of bytes accepted.
    ///
    /// `seq_num` and `replay` describe the FIX message the bytes belong to;
    /// implementations may use them for capture or reproduction logging.
    fn write(&mut self, src: &[u8], seq_num: u32, replay: bool) -> io::Result<usize>;

    /// Attempts to read available bytes into `dst`.
    fn read_into(&mut self, dst: &mut BytesMut) -> io::Result<usize>;

    /// Notified when a replay burst has fully drained onto the wire.
    fn on_replay_complete(&mut self, _correlation_id: u64) {}

    /// Human-readable peer address for logging.
    fn remote_address(&self) -> String;

    /// Releases the underlying transport.
    fn close(&mut self);
}

/// [`TcpChannel`] implementation over a non-blocking tokio TCP stream.
///
/// Uses `try_write`/`try_read_buf` so calls never block or suspend; a
/// would-block on write surfaces as zero bytes accepted, matching the
/// endpoint's partial-write policy.
#[derive(Debug)]
pub struct SocketChannel {
    stream: TcpStream,
    remote_address: String,
}

impl SocketChannel {
    /// Wraps an established TCP stream, disabling Nagle's algorithm.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let remote_address = stream
            .peer_addr()
            .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string());
        Ok(Self {
            stream,
            remote_address,
        })
    }
}

impl TcpChannel for SocketChannel {
    fn write(&mut self, src: &[u8], _seq_num: u32, _replay: bool) -> io::Result<usize> {
        match self.stream.try_write(src) {
            Ok(written) => Ok(written),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read_into(&mut self, dst: &mut BytesMut) -> io::Result<usize> {
        dst.reserve(READ_CHUNK);
        self.stream.try_read_buf(dst)
    }

    fn on_replay_complete(&mut self, correlation_id: u64) {
        tracing::trace!(correlation_id, remote = %self.remote_address, "replay drained to wire");
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }

    fn close(&mut self) {
        tracing::debug!(remote = %self.remote_address, "closing channel");
    }
}
