/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Sender endpoint for binary FIXP connections.
//!
//! FIXP retransmission is interleaved inline by the protocol, so there is no
//! separate replay stream and no stream alternation: one reattempt buffer,
//! the same partial-write checkpoint and slow-consumer policy as the FIX
//! variant.

use std::mem;
use std::sync::Arc;

use fixgate_core::{
    ConnectionId, Counter, DisconnectReason, ErrorHandler, GatewayError, LibraryId,
};
use tracing::{debug, trace, warn};

use crate::channel::TcpChannel;
use crate::config::EngineConfig;
use crate::publication::InboundPublication;
use crate::reattempt::ReattemptState;
use crate::sender::SenderCore;
use crate::timing::MessageTimingHandler;

/// Record layout: `body_len:u32 | seq:u32 | retransmit:u32 | body`.
const RECORD_BLOCK_LEN: usize = 12;

const NO_REATTEMPT: usize = 0;

/// Sender endpoint for one FIXP connection.
pub struct FixpSenderEndpoint {
    core: SenderCore,
    slow_consumer_timeout_ms: u64,
    sending_deadline_ms: u64,
    timing: Option<Arc<dyn MessageTimingHandler>>,
    retries: ReattemptState,
    requires_retry: bool,
    reattempt_bytes_written: usize,
}

impl FixpSenderEndpoint {
    /// Creates an endpoint owning `channel`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection_id: ConnectionId,
        library_id: LibraryId,
        channel: Box<dyn TcpChannel>,
        publication: Arc<dyn InboundPublication>,
        error_handler: Arc<dyn ErrorHandler>,
        timing: Option<Arc<dyn MessageTimingHandler>>,
        config: &EngineConfig,
        now_ms: u64,
    ) -> Self {
        let slow_consumer_timeout_ms = config.slow_consumer_timeout_ms();
        Self {
            core: SenderCore::new(
                connection_id,
                library_id,
                channel,
                publication,
                error_handler,
                config.max_bytes_in_buffer(),
            ),
            slow_consumer_timeout_ms,
            sending_deadline_ms: now_ms + slow_consumer_timeout_ms,
            timing,
            retries: ReattemptState::default(),
            requires_retry: false,
            reattempt_bytes_written: NO_REATTEMPT,
        }
    }

    /// Submits one outbound FIXP message.
    ///
    /// Retransmitted messages skip the timing callback.
    pub fn on_message(&mut self, body: &[u8], seq_num: u32, retransmit: bool, now_ms: u64) {
        if self.core.is_disconnecting() {
            return;
        }

        trace!(
            connection_id = %self.core.connection_id(),
            seq_num,
            retransmit,
            len = body.len(),
            "outbound fixp message"
        );

        if self.requires_retry {
            self.enqueue(body, seq_num, retransmit);
            self.reattempt(now_ms);
            return;
        }

        let from = self.reattempt_bytes_written;
        let Some(written) = self.write_frame(&body[from..], seq_num, now_ms) else {
            return;
        };
        let total_written = from + written;

        if total_written < body.len() {
            self.reattempt_bytes_written = total_written;
            self.enqueue(body, seq_num, retransmit);
            debug!(
                connection_id = %self.core.connection_id(),
                seq_num,
                total_written,
                body_len = body.len(),
                "partial write, parked remainder"
            );
        } else {
            self.reattempt_bytes_written = NO_REATTEMPT;
            if !retransmit {
                self.fire_timing(seq_num, &[]);
            }
        }
    }

    /// Drains backlog and enforces the slow-consumer deadline.
    ///
    /// Returns true iff the endpoint just disconnected itself for a
    /// slow-consumer timeout.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.core.is_disconnecting() {
            return false;
        }

        self.reattempt(now_ms);

        if self.is_slow_consumer() && now_ms > self.sending_deadline_ms {
            warn!(
                connection_id = %self.core.connection_id(),
                now_ms,
                deadline_ms = self.sending_deadline_ms,
                "no successful write within timeout, disconnecting slow consumer"
            );
            self.core.request_disconnect(DisconnectReason::SlowConsumer);
            return true;
        }

        false
    }

    /// Retries buffered frames. Returns true iff caught up.
    pub fn reattempt(&mut self, now_ms: u64) -> bool {
        if self.retries.usage() == 0 {
            return true;
        }

        let mut state = mem::take(&mut self.retries);
        let caught_up = self.drain(&mut state, now_ms);
        self.retries = state;

        if caught_up && self.requires_retry {
            self.requires_retry = false;
            self.core.send_slow_status(false);
        }
        caught_up
    }

    /// Logs the observation; FIXP retransmission is driven by its own
    /// negotiation messages.
    pub fn on_valid_resend_request(&self, correlation_id: u64) {
        debug!(
            connection_id = %self.core.connection_id(),
            correlation_id,
            "valid retransmit request"
        );
    }

    /// Weakly observed backlog check; only meaningful on the framer thread.
    #[must_use]
    pub fn is_slow_consumer(&self) -> bool {
        self.core.bytes_in_buffer().get_weak() > 0
    }

    /// Releases the buffer and the socket.
    pub fn close(&mut self) {
        self.retries.release();
        self.core.close();
    }

    /// Connection identity.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.core.connection_id()
    }

    /// Owning library identity.
    #[must_use]
    pub fn library_id(&self) -> LibraryId {
        self.core.library_id()
    }

    /// Published backlog counter.
    #[must_use]
    pub fn bytes_in_buffer(&self) -> Arc<Counter> {
        Arc::clone(self.core.bytes_in_buffer())
    }

    pub(crate) fn take_pending_disconnect(&mut self) -> Option<DisconnectReason> {
        self.core.take_pending_disconnect()
    }

    pub(crate) fn channel_mut(&mut self) -> &mut dyn TcpChannel {
        self.core.channel_mut()
    }

    fn write_frame(&mut self, frame: &[u8], seq_num: u32, now_ms: u64) -> Option<usize> {
        match self.core.channel_mut().write(frame, seq_num, false) {
            Ok(written) => {
                if written > 0 {
                    self.sending_deadline_ms = now_ms + self.slow_consumer_timeout_ms;
                }
                Some(written)
            }
            Err(source) => {
                self.core.report(&GatewayError::Io {
                    connection_id: self.core.connection_id(),
                    source,
                });
                self.core.request_disconnect(DisconnectReason::Exception);
                None
            }
        }
    }

    fn fire_timing(&self, seq_num: u32, metadata: &[u8]) {
        if let Some(timing) = &self.timing {
            timing.on_message(seq_num, self.core.connection_id(), metadata);
        }
    }

    fn enqueue(&mut self, body: &[u8], seq_num: u32, retransmit: bool) {
        if !self.requires_retry {
            self.requires_retry = true;
            self.core.send_slow_status(true);
        }

        let buffer = self.retries.buffer();
        let offset = buffer.reserve_append(RECORD_BLOCK_LEN + body.len());
        buffer.put_u32(offset, body.len() as u32);
        buffer.put_u32(offset + 4, seq_num);
        buffer.put_u32(offset + 8, u32::from(retransmit));
        buffer.put_bytes(offset + 12, body);

        let usage = self.retries.usage();
        if usage > self.core.max_bytes_in_buffer() {
            warn!(
                connection_id = %self.core.connection_id(),
                usage,
                max_bytes_in_buffer = self.core.max_bytes_in_buffer(),
                "send backlog overflow, disconnecting slow consumer"
            );
            self.core.request_disconnect(DisconnectReason::SlowConsumer);
        }
        self.core.bytes_in_buffer().set_ordered(usage as u64);
    }

    fn drain(&mut self, state: &mut ReattemptState, now_ms: u64) -> bool {
        let buffer = state.buffer();
        let usage = buffer.usage();
        let mut offset = 0;

        while offset < usage {
            let body_len = buffer.get_u32(offset) as usize;
            let seq_num = buffer.get_u32(offset + 4);
            let retransmit = buffer.get_u32(offset + 8) != 0;
            let body_offset = offset + RECORD_BLOCK_LEN;
            let from = self.reattempt_bytes_written;

            let Some(written) =
                self.write_frame(buffer.slice(body_offset + from, body_len - from), seq_num, now_ms)
            else {
                return true;
            };
            let total_written = from + written;

            if total_written < body_len {
                self.reattempt_bytes_written = total_written;
                break;
            }

            if !retransmit {
                self.fire_timing(seq_num, &[]);
            }
            self.reattempt_bytes_written = NO_REATTEMPT;
            offset = body_offset + body_len;
        }

        let new_usage = buffer.shuffle(offset);
        self.core.bytes_in_buffer().set_ordered(new_usage as u64);
        new_usage == 0
    }
}
