/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-connection sender endpoints.
//!
//! A sender endpoint multiplexes two logically separate outbound streams
//! (live traffic and replay traffic) onto one non-blocking socket, preserving
//! FIFO order within each stream. When the socket back-pressures, frames are
//! parked in per-stream reattempt buffers and drained on later ticks; stream
//! focus alternates only at replay-burst boundaries. The endpoint also owns
//! the slow-consumer policy: a backlog that overflows its byte cap or
//! outlives its write deadline disconnects the connection.
//!
//! Everything here is straight-line code driven by the framer thread. The
//! only cross-thread state is the published [`Counter`] cells.

use std::mem;
use std::sync::Arc;

use fixgate_core::{
    ConfigError, ConnectionId, Counter, DisconnectReason, ErrorHandler, GatewayError, LibraryId,
    SessionId, SessionKey, Timestamp,
};
use tracing::{debug, trace, warn};

use crate::channel::TcpChannel;
use crate::config::EngineConfig;
use crate::fixp::FixpSenderEndpoint;
use crate::publication::{Action, InboundPublication};
use crate::reattempt::{
    ENQ_CORRELATION_LEN, ENQ_MESSAGE, ENQ_MESSAGE_BLOCK_LEN, ENQ_REPLAY_COMPLETE, ENQ_START_REPLAY,
    ReattemptState,
};
use crate::throttle::ThrottleRejectBuilder;
use crate::timing::MessageTimingHandler;

/// Sequence number carried by every replay frame except the terminal frame
/// of a burst.
///
/// The terminal frame carries its real sequence number, which is what makes
/// the endpoint publish the burst's completion signal. Buffered replay
/// frames are rewritten to this sentinel once their signalling has happened
/// so a later retry cannot signal twice.
pub const NOT_LAST_REPLAY_MSG: u32 = 0;

/// No partially written frame is outstanding.
const NO_REATTEMPT: usize = 0;

const SIZE_OF_U32: usize = 4;

/// Scaffolding shared by both sender endpoint variants: the exclusively
/// owned socket, the inbound bus, the published backlog counter, and the
/// disconnect plumbing.
pub(crate) struct SenderCore {
    connection_id: ConnectionId,
    library_id: LibraryId,
    channel: Box<dyn TcpChannel>,
    publication: Arc<dyn InboundPublication>,
    error_handler: Arc<dyn ErrorHandler>,
    bytes_in_buffer: Arc<Counter>,
    max_bytes_in_buffer: usize,
    pending_disconnect: Option<DisconnectReason>,
}

impl SenderCore {
    pub(crate) fn new(
        connection_id: ConnectionId,
        library_id: LibraryId,
        channel: Box<dyn TcpChannel>,
        publication: Arc<dyn InboundPublication>,
        error_handler: Arc<dyn ErrorHandler>,
        max_bytes_in_buffer: usize,
    ) -> Self {
        Self {
            connection_id,
            library_id,
            channel,
            publication,
            error_handler,
            bytes_in_buffer: Arc::new(Counter::new()),
            max_bytes_in_buffer,
            pending_disconnect: None,
        }
    }

    /// Records a disconnect request for the framer to route. The first
    /// reason wins; once set, the endpoint ignores all further input.
    pub(crate) fn request_disconnect(&mut self, reason: DisconnectReason) {
        if self.pending_disconnect.is_none() {
            debug!(connection_id = %self.connection_id, %reason, "requesting disconnect");
            self.pending_disconnect = Some(reason);
        }
    }

    pub(crate) fn is_disconnecting(&self) -> bool {
        self.pending_disconnect.is_some()
    }

    pub(crate) fn take_pending_disconnect(&mut self) -> Option<DisconnectReason> {
        self.pending_disconnect.take()
    }

    /// Publishes a slow/not-slow transition. Only invoked at transitions, so
    /// consecutive notifications never repeat a value.
    pub(crate) fn send_slow_status(&self, slow: bool) {
        debug!(connection_id = %self.connection_id, slow, "slow consumer transition");
        self.publication
            .on_slow_status(self.library_id, self.connection_id, slow);
    }

    /// Signals a replay burst's completion on the inbound bus.
    pub(crate) fn publish_replay_complete(&self, correlation_id: u64) -> Action {
        self.publication
            .on_replay_complete(self.connection_id, correlation_id)
    }

    pub(crate) fn report(&self, error: &GatewayError) {
        self.error_handler.on_error(error);
    }

    pub(crate) fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub(crate) fn library_id(&self) -> LibraryId {
        self.library_id
    }

    pub(crate) fn max_bytes_in_buffer(&self) -> usize {
        self.max_bytes_in_buffer
    }

    pub(crate) fn bytes_in_buffer(&self) -> &Arc<Counter> {
        &self.bytes_in_buffer
    }

    pub(crate) fn channel_mut(&mut self) -> &mut dyn TcpChannel {
        self.channel.as_mut()
    }

    pub(crate) fn close(&mut self) {
        self.bytes_in_buffer.set_ordered(0);
        self.channel.close();
    }
}

/// The FIX sender endpoint: live/replay multiplexing, partial-write retry,
/// the replay-start/replay-complete handshake, throttle-reject construction,
/// and per-message timing callbacks.
pub struct FixSenderEndpoint {
    core: SenderCore,
    session_id: SessionId,
    session_key: Option<SessionKey>,
    slow_consumer_timeout_ms: u64,
    /// Wall-clock deadline; passing it while still backlogged disconnects.
    sending_deadline_ms: u64,
    throttle: Option<ThrottleRejectBuilder>,
    throttle_window_ms: u64,
    throttle_limit: usize,
    sender_sequence: Arc<Counter>,
    invalid_library_attempts: Arc<Counter>,
    timing: Option<Arc<dyn MessageTimingHandler>>,
    normal: ReattemptState,
    replay: ReattemptState,
    replaying: bool,
    replay_correlation_id: u64,
    requires_retry: bool,
    /// Bytes of the head-of-queue frame already flushed in prior attempts.
    reattempt_bytes_written: usize,
}

impl FixSenderEndpoint {
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
            session_id: SessionId::UNKNOWN,
            session_key: None,
            slow_consumer_timeout_ms,
            sending_deadline_ms: now_ms + slow_consumer_timeout_ms,
            throttle: None,
            throttle_window_ms: config.throttle_window_ms(),
            throttle_limit: config.throttle_limit(),
            sender_sequence: Arc::new(Counter::new()),
            invalid_library_attempts: Arc::new(Counter::new()),
            timing,
            normal: ReattemptState::default(),
            replay: ReattemptState::default(),
            replaying: false,
            replay_correlation_id: 0,
            requires_retry: false,
            reattempt_bytes_written: NO_REATTEMPT,
        }
    }

    /// Submits a live outbound message.
    ///
    /// `metadata` is opaque library-attached context handed back through the
    /// timing callback once the body is fully on the wire.
    #[allow(clippy::too_many_arguments)]
    pub fn on_outbound_message(
        &mut self,
        library_id: LibraryId,
        body: &[u8],
        metadata: &[u8],
        seq_num: u32,
        sequence_index: i32,
        msg_type: &[u8],
        now_ms: u64,
    ) {
        if self.is_wrong_library(library_id) {
            self.invalid_library_attempts.increment();
            return;
        }

        trace!(
            connection_id = %self.core.connection_id,
            seq_num,
            sequence_index,
            msg_type = %String::from_utf8_lossy(msg_type),
            len = body.len(),
            "outbound message"
        );

        self.on_message(body, metadata, seq_num, now_ms, false);
        self.sender_sequence.set_ordered(u64::from(seq_num));
    }

    /// Submits a frame from the archive replay reader.
    ///
    /// Every frame of a burst except the terminal one must carry
    /// [`NOT_LAST_REPLAY_MSG`]; the terminal frame carries its real sequence
    /// number.
    pub fn on_replay_message(&mut self, body: &[u8], seq_num: u32, now_ms: u64) {
        self.on_message(body, &[], seq_num, now_ms, true);
    }

    /// Builds and submits a Business Message Reject for a throttled message.
    #[allow(clippy::too_many_arguments)]
    pub fn on_throttle_reject(
        &mut self,
        library_id: LibraryId,
        ref_msg_type: &[u8],
        ref_seq_num: u32,
        seq_num: u32,
        sequence_index: i32,
        business_reject_ref_id: &[u8],
        now_ms: u64,
    ) {
        if self.is_wrong_library(library_id) {
            self.invalid_library_attempts.increment();
            return;
        }

        if self.throttle.is_none() && self.session_key.is_none() {
            // The session key only arrives at logon; without it the reject
            // cannot be stamped. Per-message drop, no disconnect.
            self.core.report(&GatewayError::from(ConfigError::SessionKeyMissing {
                connection_id: self.core.connection_id,
            }));
            return;
        }
        let Some(builder) = self.throttle_builder() else {
            return;
        };
        let message = builder.build(
            ref_msg_type,
            ref_seq_num,
            seq_num,
            business_reject_ref_id,
            Timestamp::from_millis(now_ms),
        );

        trace!(
            connection_id = %self.core.connection_id,
            seq_num,
            sequence_index,
            ref_seq_num,
            "throttle reject"
        );

        self.on_message(&message, &[], seq_num, now_ms, false);
        self.sender_sequence.set_ordered(u64::from(seq_num));
    }

    /// Notifies that a replay burst is about to begin.
    pub fn on_start_replay(&mut self, correlation_id: u64) {
        if self.core.is_disconnecting() {
            return;
        }

        debug!(
            connection_id = %self.core.connection_id,
            correlation_id,
            "start of replay"
        );

        // Starting here rather than at the resend request keeps the start
        // from racing the previous burst's completion.
        if self.replaying || self.requires_retry {
            self.enqueue_correlation(correlation_id, ENQ_START_REPLAY);
        } else {
            self.set_replaying(true, correlation_id);
        }
    }

    /// Terminal sentinel for a replay burst from the resend controller.
    pub fn on_replay_complete(&mut self, correlation_id: u64, now_ms: u64) {
        if self.core.is_disconnecting() {
            return;
        }

        debug!(
            connection_id = %self.core.connection_id,
            correlation_id,
            "replay complete"
        );

        // The sentinel can arrive when the burst already self-terminated via
        // its terminal frame, in which case replay_correlation_id matches.
        if (!self.replaying && self.replay_correlation_id != correlation_id)
            || !self.reattempt_stream(true, now_ms)
        {
            self.enqueue_correlation(correlation_id, ENQ_REPLAY_COMPLETE);
        } else {
            self.set_replaying(false, correlation_id);
            self.core.channel.on_replay_complete(correlation_id);
        }
    }

    /// Observational only; the replay itself starts at `on_start_replay`.
    pub fn on_valid_resend_request(&self, correlation_id: u64) {
        debug!(
            connection_id = %self.core.connection_id,
            correlation_id,
            "valid resend request"
        );
    }

    /// Installs the session identity established at logon.
    pub fn on_logon(&mut self, session_id: SessionId, session_key: SessionKey) {
        debug!(
            connection_id = %self.core.connection_id,
            %session_id,
            session = %session_key,
            "session established"
        );
        self.session_id = session_id;
        self.session_key = Some(session_key);
    }

    /// Reconfigures the throttle window quoted in reject messages.
    pub fn configure_throttle(&mut self, window_ms: u64, limit: usize) {
        self.throttle_window_ms = window_ms;
        self.throttle_limit = limit;
        if let Some(builder) = self.throttle.as_mut() {
            builder.configure(window_ms, limit);
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
                connection_id = %self.core.connection_id,
                session_id = %self.session_id,
                now_ms,
                deadline_ms = self.sending_deadline_ms,
                "no successful write within timeout, disconnecting slow consumer"
            );
            self.core.request_disconnect(DisconnectReason::SlowConsumer);
            return true;
        }

        false
    }

    /// Retries the currently focused stream. Returns true iff it caught up.
    pub fn reattempt(&mut self, now_ms: u64) -> bool {
        let replaying = self.replaying;
        self.reattempt_stream(replaying, now_ms)
    }

    /// Weakly observed backlog check; only meaningful on the framer thread.
    #[must_use]
    pub fn is_slow_consumer(&self) -> bool {
        self.core.bytes_in_buffer.get_weak() > 0
    }

    /// Releases buffers and the socket.
    pub fn close(&mut self) {
        self.normal.release();
        self.replay.release();
        self.core.close();
    }

    /// Connection identity, immutable for the endpoint's lifetime.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.core.connection_id
    }

    /// Owning library identity.
    #[must_use]
    pub fn library_id(&self) -> LibraryId {
        self.core.library_id
    }

    /// Session identity; [`SessionId::UNKNOWN`] before logon.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Published backlog counter for the active stream.
    #[must_use]
    pub fn bytes_in_buffer(&self) -> Arc<Counter> {
        Arc::clone(&self.core.bytes_in_buffer)
    }

    /// Published count of submissions dropped by the library-id gate.
    #[must_use]
    pub fn invalid_library_attempts(&self) -> Arc<Counter> {
        Arc::clone(&self.invalid_library_attempts)
    }

    /// Published highest outbound sequence number accepted.
    #[must_use]
    pub fn sender_sequence_number(&self) -> Arc<Counter> {
        Arc::clone(&self.sender_sequence)
    }

    pub(crate) fn take_pending_disconnect(&mut self) -> Option<DisconnectReason> {
        self.core.take_pending_disconnect()
    }

    pub(crate) fn channel_mut(&mut self) -> &mut dyn TcpChannel {
        self.core.channel_mut()
    }

    /// True while a replay burst holds the stream focus.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// True iff a reattempt buffer is pending for the focused stream.
    #[must_use]
    pub fn requires_retry(&self) -> bool {
        self.requires_retry
    }

    // --- write-or-enqueue -------------------------------------------------

    fn on_message(&mut self, body: &[u8], metadata: &[u8], seq_num: u32, now_ms: u64, replay: bool) {
        if self.core.is_disconnecting() {
            return;
        }

        // A frame for the unfocused stream, or any frame while backlogged,
        // is parked rather than written.
        if self.replaying != replay || self.requires_retry {
            self.enqueue_message(body, metadata, seq_num, replay);
            if self.requires_retry {
                self.reattempt(now_ms);
            }
            return;
        }

        if self.check_last_replayed_message(seq_num, replay) {
            // The completion signal is back-pressured; park and retry later.
            self.enqueue_message(body, metadata, seq_num, replay);
            return;
        }

        let reattempt_bytes_written = self.reattempt_bytes_written;
        let Some(written) =
            self.write_frame(&body[reattempt_bytes_written..], seq_num, replay, now_ms)
        else {
            return;
        };
        let total_written = reattempt_bytes_written + written;

        if total_written < body.len() {
            self.reattempt_bytes_written = total_written;
            // Park the entire original frame; the checkpoint remembers how
            // much of it is already on the wire. A replay frame is parked
            // with the sentinel so a retry cannot signal completion twice.
            let enq_seq = if replay { NOT_LAST_REPLAY_MSG } else { seq_num };
            self.enqueue_message(body, metadata, enq_seq, replay);

            debug!(
                connection_id = %self.core.connection_id,
                seq_num,
                replay,
                written,
                total_written,
                body_len = body.len(),
                "partial write, parked remainder"
            );
        } else {
            self.reattempt_bytes_written = NO_REATTEMPT;
            if !replay {
                self.fire_timing(seq_num, metadata);
            }
        }
    }

    /// Writes one pre-positioned frame slice, refreshing the slow-consumer
    /// deadline on any successful write. `None` means the endpoint is now
    /// disconnecting.
    fn write_frame(
        &mut self,
        frame: &[u8],
        seq_num: u32,
        replay: bool,
        now_ms: u64,
    ) -> Option<usize> {
        match self.core.channel.write(frame, seq_num, replay) {
            Ok(written) => {
                if written > 0 {
                    self.sending_deadline_ms = now_ms + self.slow_consumer_timeout_ms;
                }
                trace!(
                    connection_id = %self.core.connection_id,
                    seq_num,
                    replay,
                    written,
                    requested = frame.len(),
                    "socket write"
                );
                Some(written)
            }
            Err(source) => {
                self.core.report(&GatewayError::Io {
                    connection_id: self.core.connection_id,
                    source,
                });
                self.core.request_disconnect(DisconnectReason::Exception);
                None
            }
        }
    }

    /// Whether the frame under consideration is a burst's terminal frame
    /// whose completion signal is back-pressured.
    ///
    /// A terminal frame (real sequence number on the replay stream) triggers
    /// the completion publish; [`Action::Abort`] means the caller must park
    /// the frame and retry.
    fn check_last_replayed_message(&self, seq_num: u32, replay: bool) -> bool {
        replay
            && seq_num != NOT_LAST_REPLAY_MSG
            && self.core.publish_replay_complete(self.replay_correlation_id) == Action::Abort
    }

    fn fire_timing(&self, seq_num: u32, metadata: &[u8]) {
        if let Some(timing) = &self.timing {
            timing.on_message(seq_num, self.core.connection_id, metadata);
        }
    }

    // --- enqueueing -------------------------------------------------------

    fn enqueue_message(&mut self, body: &[u8], metadata: &[u8], seq_num: u32, replay: bool) {
        let total_length = ENQ_MESSAGE_BLOCK_LEN + body.len() + metadata.len();

        let mut state = mem::take(self.stream_state_mut(replay));
        let offset = self.enqueue(&mut state, total_length, replay);

        let buffer = state.buffer();
        buffer.put_u32(offset, ENQ_MESSAGE);
        buffer.put_u32(offset + 4, seq_num);
        buffer.put_u32(offset + 8, body.len() as u32);
        buffer.put_bytes(offset + 12, body);
        buffer.put_u32(offset + 12 + body.len(), metadata.len() as u32);
        buffer.put_bytes(offset + 16 + body.len(), metadata);

        *self.stream_state_mut(replay) = state;
    }

    /// Start/complete markers always live on the replay buffer.
    fn enqueue_correlation(&mut self, correlation_id: u64, tag: u32) {
        let mut state = mem::take(&mut self.replay);
        let offset = self.enqueue(&mut state, ENQ_CORRELATION_LEN, true);

        let buffer = state.buffer();
        buffer.put_u32(offset, tag);
        buffer.put_u64(offset + 4, correlation_id);

        self.replay = state;
    }

    /// Reserves space in `state`, maintaining retry/slow-consumer state when
    /// the record lands on the focused stream.
    fn enqueue(&mut self, state: &mut ReattemptState, length: usize, replay: bool) -> usize {
        let current_stream = replay == self.replaying;
        if !self.requires_retry && current_stream {
            self.set_requires_retry(true);
            self.core.send_slow_status(true);
        }

        let offset = state.buffer().reserve_append(length);
        let usage = state.usage();
        if current_stream {
            if usage > self.core.max_bytes_in_buffer {
                warn!(
                    connection_id = %self.core.connection_id,
                    session_id = %self.session_id,
                    usage,
                    max_bytes_in_buffer = self.core.max_bytes_in_buffer,
                    replay,
                    "send backlog overflow, disconnecting slow consumer"
                );
                self.core.request_disconnect(DisconnectReason::SlowConsumer);
            }
            self.core.bytes_in_buffer.set_ordered(usage as u64);
        }
        offset
    }

    // --- draining ---------------------------------------------------------

    /// Drives the given stream, then alternates focus at the boundary:
    /// once the focused stream drains, either the other stream takes focus
    /// (if it has backlog) or the endpoint leaves the retry state.
    fn reattempt_stream(&mut self, replaying: bool, now_ms: u64) -> bool {
        let caught_up = self.process_reattempt_buffer(replaying, now_ms);
        if caught_up && self.requires_retry {
            let other = !replaying;
            let usage = self.stream_usage(other);
            if usage == 0 {
                self.set_requires_retry(false);
                self.core.send_slow_status(false);
            } else {
                self.set_replaying(other, self.replay_correlation_id);
                self.core.bytes_in_buffer.set_ordered(usage as u64);
            }
        }
        caught_up
    }

    /// Walks one stream's buffer from offset 0, writing records until the
    /// socket back-pressures or the buffer empties. Returns caught-up.
    fn process_reattempt_buffer(&mut self, replay: bool, now_ms: u64) -> bool {
        if self.stream_usage(replay) == 0 {
            return true;
        }

        let mut state = mem::take(self.stream_state_mut(replay));
        let caught_up = self.drain_buffer(&mut state, replay, now_ms);
        *self.stream_state_mut(replay) = state;
        caught_up
    }

    fn drain_buffer(&mut self, state: &mut ReattemptState, replay: bool, now_ms: u64) -> bool {
        let buffer = state.buffer();
        let usage = buffer.usage();
        let mut offset = 0;

        while offset < usage {
            let tag = buffer.get_u32(offset);
            if tag == ENQ_MESSAGE {
                let seq_offset = offset + SIZE_OF_U32;
                let seq_num = buffer.get_u32(seq_offset);

                if self.check_last_replayed_message(seq_num, replay) {
                    // Completion signal back-pressured; retry from scratch.
                    self.reattempt_bytes_written = NO_REATTEMPT;
                    break;
                }
                if replay {
                    // The signal (if any) has now happened; a later retry of
                    // this same record must not signal again.
                    buffer.put_u32(seq_offset, NOT_LAST_REPLAY_MSG);
                }

                let body_len = buffer.get_u32(seq_offset + 4) as usize;
                let body_offset = seq_offset + 8;
                let from = self.reattempt_bytes_written;

                let Some(written) = self.write_frame(
                    buffer.slice(body_offset + from, body_len - from),
                    seq_num,
                    replay,
                    now_ms,
                ) else {
                    return true;
                };
                let total_written = from + written;

                if total_written < body_len {
                    self.reattempt_bytes_written = total_written;
                    debug!(
                        connection_id = %self.core.connection_id,
                        seq_num,
                        replay,
                        total_written,
                        body_len,
                        "partial write during retry"
                    );
                    break;
                }

                let meta_len_offset = body_offset + body_len;
                let meta_len = buffer.get_u32(meta_len_offset) as usize;
                if !replay {
                    self.fire_timing(seq_num, buffer.slice(meta_len_offset + SIZE_OF_U32, meta_len));
                }
                self.reattempt_bytes_written = NO_REATTEMPT;
                offset = meta_len_offset + SIZE_OF_U32 + meta_len;
            } else if tag == ENQ_REPLAY_COMPLETE {
                let correlation_id = buffer.get_u64(offset + SIZE_OF_U32);
                self.reattempt_bytes_written = NO_REATTEMPT;
                let end_of_entry = offset + ENQ_CORRELATION_LEN;

                // Peek past the marker: a start marker means the next burst
                // is already queued and the replay stream keeps the focus.
                // No bytes left means burst-end.
                let burst_continues = end_of_entry + SIZE_OF_U32 <= usage
                    && buffer.get_u32(end_of_entry) == ENQ_START_REPLAY;

                if !burst_continues {
                    self.set_replaying(false, correlation_id);
                    buffer.shuffle(end_of_entry);
                    self.core
                        .bytes_in_buffer
                        .set_ordered(self.stream_usage(false) as u64);
                    return true;
                }
                offset = end_of_entry;
            } else if tag == ENQ_START_REPLAY {
                offset += ENQ_CORRELATION_LEN;
            } else {
                self.core.report(&GatewayError::UnknownReattemptTag {
                    connection_id: self.core.connection_id,
                    tag,
                    offset,
                    usage,
                    replay,
                });
                self.core.request_disconnect(DisconnectReason::Exception);
                return true;
            }
        }

        let new_usage = buffer.shuffle(offset);
        self.core.bytes_in_buffer.set_ordered(new_usage as u64);
        new_usage == 0
    }

    // --- state ------------------------------------------------------------

    fn stream_state_mut(&mut self, replay: bool) -> &mut ReattemptState {
        if replay { &mut self.replay } else { &mut self.normal }
    }

    fn stream_usage(&self, replay: bool) -> usize {
        if replay {
            self.replay.usage()
        } else {
            self.normal.usage()
        }
    }

    fn set_replaying(&mut self, replaying: bool, correlation_id: u64) {
        debug!(
            connection_id = %self.core.connection_id,
            replaying,
            correlation_id,
            "stream focus"
        );
        self.replaying = replaying;
        self.replay_correlation_id = correlation_id;
    }

    fn set_requires_retry(&mut self, requires_retry: bool) {
        debug!(
            connection_id = %self.core.connection_id,
            requires_retry,
            "retry state"
        );
        self.requires_retry = requires_retry;
    }

    fn is_wrong_library(&self, library_id: LibraryId) -> bool {
        library_id != self.core.library_id
    }

    fn throttle_builder(&mut self) -> Option<&mut ThrottleRejectBuilder> {
        if self.throttle.is_none() {
            let session_key = self.session_key.clone()?;
            self.throttle = Some(ThrottleRejectBuilder::new(
                session_key,
                self.session_id,
                self.core.connection_id,
                self.throttle_window_ms,
                self.throttle_limit,
            ));
        }
        self.throttle.as_mut()
    }
}

/// The two sender endpoint variants behind one dispatch surface.
///
/// The FIX variant carries the replay multiplexer described above; the FIXP
/// variant reuses the partial-write and slow-consumer scaffolding but has no
/// replay stream.
pub enum SenderEndpoint {
    /// Classic tag=value FIX connection.
    Fix(FixSenderEndpoint),
    /// Binary FIXP connection.
    Fixp(FixpSenderEndpoint),
}

impl SenderEndpoint {
    /// Performs the retry drain and slow-consumer deadline check.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self {
            Self::Fix(endpoint) => endpoint.poll(now_ms),
            Self::Fixp(endpoint) => endpoint.poll(now_ms),
        }
    }

    /// Retries buffered frames. Returns true iff caught up.
    pub fn reattempt(&mut self, now_ms: u64) -> bool {
        match self {
            Self::Fix(endpoint) => endpoint.reattempt(now_ms),
            Self::Fixp(endpoint) => endpoint.reattempt(now_ms),
        }
    }

    /// Releases counters, buffers, and the socket.
    pub fn close(&mut self) {
        match self {
            Self::Fix(endpoint) => endpoint.close(),
            Self::Fixp(endpoint) => endpoint.close(),
        }
    }

    /// Weakly observed backlog check.
    #[must_use]
    pub fn is_slow_consumer(&self) -> bool {
        match self {
            Self::Fix(endpoint) => endpoint.is_slow_consumer(),
            Self::Fixp(endpoint) => endpoint.is_slow_consumer(),
        }
    }

    /// Logs the observation; replay handling starts at `on_start_replay`.
    pub fn on_valid_resend_request(&self, correlation_id: u64) {
        match self {
            Self::Fix(endpoint) => endpoint.on_valid_resend_request(correlation_id),
            Self::Fixp(endpoint) => endpoint.on_valid_resend_request(correlation_id),
        }
    }

    /// Connection identity.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Fix(endpoint) => endpoint.connection_id(),
            Self::Fixp(endpoint) => endpoint.connection_id(),
        }
    }

    /// Owning library identity.
    #[must_use]
    pub fn library_id(&self) -> LibraryId {
        match self {
            Self::Fix(endpoint) => endpoint.library_id(),
            Self::Fixp(endpoint) => endpoint.library_id(),
        }
    }

    pub(crate) fn take_pending_disconnect(&mut self) -> Option<DisconnectReason> {
        match self {
            Self::Fix(endpoint) => endpoint.take_pending_disconnect(),
            Self::Fixp(endpoint) => endpoint.take_pending_disconnect(),
        }
    }

    pub(crate) fn channel_mut(&mut self) -> &mut dyn TcpChannel {
        match self {
            Self::Fix(endpoint) => endpoint.channel_mut(),
            Self::Fixp(endpoint) => endpoint.channel_mut(),
        }
    }

    /// The FIX variant, if this is one.
    pub fn as_fix_mut(&mut self) -> Option<&mut FixSenderEndpoint> {
        match self {
            Self::Fix(endpoint) => Some(endpoint),
            Self::Fixp(_) => None,
        }
    }

    /// The FIXP variant, if this is one.
    pub fn as_fixp_mut(&mut self) -> Option<&mut FixpSenderEndpoint> {
        match self {
            Self::Fix(_) => None,
            Self::Fixp(endpoint) => Some(endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::{
        CollectingErrors, CollectingPublication, RecordingTiming, StubChannel,
    };
    use fixgate_core::CompId;

    const CONN: ConnectionId = ConnectionId::new(1);
    const LIB: LibraryId = LibraryId::new(7);

    struct Fixture {
        channel: StubChannel,
        publication: CollectingPublication,
        timing: RecordingTiming,
        errors: CollectingErrors,
        sender: FixSenderEndpoint,
    }

    fn fixture(config: &EngineConfig) -> Fixture {
        let channel = StubChannel::new();
        let publication = CollectingPublication::default();
        let timing = RecordingTiming::default();
        let errors = CollectingErrors::default();
        let sender = FixSenderEndpoint::new(
            CONN,
            LIB,
            Box::new(channel.clone()),
            Arc::new(publication.clone()),
            Arc::new(errors.clone()),
            Some(Arc::new(timing.clone())),
            config,
            0,
        );
        Fixture {
            channel,
            publication,
            timing,
            errors,
            sender,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(&EngineConfig::new())
    }

    fn submit(f: &mut Fixture, body: &[u8], seq_num: u32, now_ms: u64) {
        f.sender
            .on_outbound_message(LIB, body, b"", seq_num, 0, b"D", now_ms);
    }

    fn timing_seqs(f: &Fixture) -> Vec<u32> {
        f.timing.timings().iter().map(|(seq, _)| *seq).collect()
    }

    #[test]
    fn test_direct_write_happy_path() {
        let mut f = default_fixture();

        f.sender
            .on_outbound_message(LIB, b"8=FIX.4.4|A", b"meta", 1, 0, b"D", 0);

        assert_eq!(f.channel.written(), b"8=FIX.4.4|A");
        assert_eq!(f.timing.timings(), vec![(1, b"meta".to_vec())]);
        assert!(!f.sender.requires_retry());
        assert!(!f.sender.normal.is_allocated());
        assert!(!f.sender.replay.is_allocated());
        assert_eq!(f.sender.bytes_in_buffer().get(), 0);
    }

    #[test]
    fn test_partial_write_buffers_whole_frame() {
        let mut f = default_fixture();

        f.channel.push_accept(3);
        f.sender
            .on_outbound_message(LIB, b"0123456789", b"m1", 1, 0, b"D", 0);

        assert_eq!(f.sender.reattempt_bytes_written, 3);
        assert!(f.sender.requires_retry());
        assert_eq!(f.channel.written(), b"012");
        // The whole original frame is parked, not just the unwritten tail.
        assert_eq!(f.sender.normal.usage(), ENQ_MESSAGE_BLOCK_LEN + 10 + 2);
        assert!(f.sender.bytes_in_buffer().get() > 0);
        assert_eq!(f.publication.slow_statuses(), vec![true]);
        assert!(f.timing.timings().is_empty());

        assert!(!f.sender.poll(1));

        assert_eq!(f.channel.written(), b"0123456789");
        assert_eq!(f.timing.timings(), vec![(1, b"m1".to_vec())]);
        assert!(!f.sender.requires_retry());
        assert_eq!(f.sender.normal.usage(), 0);
        assert_eq!(f.sender.bytes_in_buffer().get(), 0);
        assert_eq!(f.publication.slow_statuses(), vec![true, false]);
    }

    #[test]
    fn test_replay_interleaved_with_normal() {
        let mut f = default_fixture();

        submit(&mut f, b"N1", 1, 0);
        f.sender.on_start_replay(42);
        f.sender.on_replay_message(b"R1", NOT_LAST_REPLAY_MSG, 0);
        submit(&mut f, b"N2", 2, 0);
        f.sender.on_replay_message(b"R2", 6, 0);
        f.sender.on_replay_complete(42, 0);
        f.sender.poll(1);

        assert_eq!(f.channel.written(), b"N1R1R2N2");
        assert_eq!(f.publication.replay_completes(), vec![42]);
        assert_eq!(f.channel.replay_completes(), vec![42]);
        assert_eq!(timing_seqs(&f), vec![1, 2]);
        assert!(!f.sender.is_replaying());
        assert!(!f.sender.requires_retry());
    }

    #[test]
    fn test_buffer_overflow_disconnects_slow_consumer() {
        let config = EngineConfig::new().with_max_bytes_in_buffer(ENQ_MESSAGE_BLOCK_LEN + 50);
        let mut f = fixture(&config);
        f.channel.set_default_accept(Some(0));

        // Exactly at the cap: still alive.
        submit(&mut f, &[b'X'; 50], 1, 0);
        assert!(!f.sender.core.is_disconnecting());

        // One more byte of backlog goes over.
        submit(&mut f, b"Y", 2, 0);
        assert!(f.sender.core.is_disconnecting());

        // Further submissions never reach the socket.
        submit(&mut f, &[b'Z'; 8], 3, 0);
        assert_eq!(f.channel.written(), b"");

        assert_eq!(
            f.sender.take_pending_disconnect(),
            Some(DisconnectReason::SlowConsumer)
        );
        assert_eq!(f.sender.take_pending_disconnect(), None);
    }

    #[test]
    fn test_slow_consumer_timeout() {
        let config = EngineConfig::new()
            .with_max_bytes_in_buffer(10_000)
            .with_slow_consumer_timeout_ms(5_000);
        let mut f = fixture(&config);
        f.channel.set_default_accept(Some(0));

        submit(&mut f, b"STUCK", 1, 0);

        assert!(!f.sender.poll(4_999));
        assert!(!f.sender.core.is_disconnecting());

        assert!(f.sender.poll(5_001));
        assert_eq!(
            f.sender.take_pending_disconnect(),
            Some(DisconnectReason::SlowConsumer)
        );
    }

    #[test]
    fn test_wrong_library_id_is_dropped() {
        let mut f = default_fixture();

        f.sender
            .on_outbound_message(LibraryId::new(8), b"INJECTED", b"", 1, 0, b"D", 0);

        assert_eq!(f.sender.invalid_library_attempts().get(), 1);
        assert!(f.channel.write_calls().is_empty());
        assert!(f.timing.timings().is_empty());
    }

    #[test]
    fn test_deadline_refreshes_on_drain_write() {
        let config = EngineConfig::new().with_slow_consumer_timeout_ms(5_000);
        let mut f = fixture(&config);

        f.channel.set_default_accept(Some(0));
        f.channel.push_accept(3);
        submit(&mut f, b"0123456789", 1, 0);

        // A drain write that makes progress pushes the deadline out.
        f.channel.push_accept(3);
        assert!(!f.sender.poll(4_000));

        assert!(!f.sender.poll(5_001));
        assert!(f.sender.poll(9_001));
    }

    #[test]
    fn test_partial_terminal_replay_signals_once() {
        let mut f = default_fixture();

        f.sender.on_start_replay(7);
        f.channel.push_accept(3);
        f.sender.on_replay_message(b"0123456789", 9, 0);

        // The completion signal fired on the first attempt; the parked
        // frame was rewritten so the retry cannot signal again.
        assert_eq!(f.publication.replay_completes(), vec![7]);
        assert!(f.sender.requires_retry());

        f.sender.poll(1);

        assert_eq!(f.channel.written(), b"0123456789");
        assert_eq!(f.publication.replay_completes(), vec![7]);
        assert!(f.timing.timings().is_empty());
    }

    #[test]
    fn test_backpressured_replay_complete_retries() {
        let mut f = default_fixture();
        f.publication.set_abort_replay_complete(true);

        f.sender.on_start_replay(5);
        f.sender.on_replay_message(b"LAST", 3, 0);

        // Signal aborted: frame parked with its real sequence number.
        assert!(f.channel.written().is_empty());
        assert!(f.sender.requires_retry());
        assert_eq!(f.sender.replay.usage(), ENQ_MESSAGE_BLOCK_LEN + 4);

        // Still back-pressured: drain stops before writing the frame.
        f.sender.poll(1);
        assert!(f.channel.written().is_empty());

        f.publication.set_abort_replay_complete(false);
        f.sender.poll(2);
        f.sender.on_replay_complete(5, 3);

        assert_eq!(f.channel.written(), b"LAST");
        assert_eq!(f.publication.replay_completes(), vec![5]);
        assert_eq!(f.channel.replay_completes(), vec![5]);
        assert!(!f.sender.is_replaying());
        assert!(!f.sender.requires_retry());
    }

    #[test]
    fn test_queued_followup_burst_drains_in_order() {
        let mut f = default_fixture();
        f.channel.set_default_accept(Some(0));

        f.sender.on_start_replay(1);
        f.sender.on_replay_message(b"R1R1R1", 5, 0);
        f.sender.on_replay_complete(1, 0);
        f.sender.on_start_replay(2);
        f.sender.on_replay_message(b"R2R2R2", 6, 0);

        f.channel.set_default_accept(None);
        f.sender.poll(1);
        f.sender.on_replay_complete(2, 2);

        assert_eq!(f.channel.written(), b"R1R1R1R2R2R2");
        assert_eq!(f.channel.replay_completes(), vec![2]);
        assert!(!f.sender.is_replaying());
        assert!(!f.sender.requires_retry());
        assert_eq!(f.sender.replay.usage(), 0);
    }

    #[test]
    fn test_buffered_complete_marker_ends_burst() {
        let mut f = default_fixture();
        f.channel.set_default_accept(Some(0));

        f.sender.on_start_replay(9);
        f.sender.on_replay_message(b"R1", 4, 0);
        f.sender.on_replay_complete(9, 0);

        f.channel.set_default_accept(None);
        f.sender.poll(1);

        // The marker was the last record in the buffer: burst-end.
        assert!(!f.sender.is_replaying());
        assert!(!f.sender.requires_retry());
        assert_eq!(f.sender.replay.usage(), 0);
        assert_eq!(f.channel.written(), b"R1");
    }

    #[test]
    fn test_stale_complete_is_parked() {
        let mut f = default_fixture();

        f.sender.on_replay_complete(99, 0);

        assert_eq!(f.sender.replay.usage(), ENQ_CORRELATION_LEN);
        assert!(f.channel.replay_completes().is_empty());
        assert!(f.publication.replay_completes().is_empty());
        assert!(!f.sender.requires_retry());
    }

    #[test]
    fn test_write_error_reports_and_disconnects() {
        let mut f = default_fixture();

        f.channel.fail_next_write();
        submit(&mut f, b"DOOMED", 1, 0);

        let errors = f.errors.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("io error on connection 1"));
        assert!(f.sender.core.is_disconnecting());

        submit(&mut f, b"AFTER", 2, 0);
        assert!(f.channel.written().is_empty());
        assert_eq!(
            f.sender.take_pending_disconnect(),
            Some(DisconnectReason::Exception)
        );
    }

    #[test]
    fn test_corrupt_record_tag_abandons_drain() {
        let mut f = default_fixture();

        f.channel.set_default_accept(Some(0));
        submit(&mut f, b"SOON-CORRUPT", 1, 0);
        f.sender.normal.buffer().put_u32(0, 99);

        f.channel.set_default_accept(None);
        f.sender.poll(1);

        let errors = f.errors.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown reattempt record tag 99"));
        assert_eq!(
            f.sender.take_pending_disconnect(),
            Some(DisconnectReason::Exception)
        );
    }

    #[test]
    fn test_backlog_preserves_submission_order() {
        let mut f = default_fixture();

        f.channel.set_default_accept(Some(0));
        f.channel.push_accept(2);
        submit(&mut f, b"AAAAA", 1, 0);
        submit(&mut f, b"BBBBB", 2, 0);
        submit(&mut f, b"CCCCC", 3, 0);

        f.channel.set_default_accept(Some(3));
        for tick in 1..6 {
            f.sender.poll(tick);
        }

        assert_eq!(f.channel.written(), b"AAAAABBBBBCCCCC");
        assert_eq!(timing_seqs(&f), vec![1, 2, 3]);
        assert!(!f.sender.requires_retry());
    }

    #[test]
    fn test_slow_status_fires_only_at_transitions() {
        let mut f = default_fixture();

        f.channel.set_default_accept(Some(0));
        submit(&mut f, b"ONE", 1, 0);
        submit(&mut f, b"TWO", 2, 0);
        f.sender.poll(1);

        f.channel.set_default_accept(None);
        f.sender.poll(2);
        f.sender.poll(3);

        assert_eq!(f.publication.slow_statuses(), vec![true, false]);
    }

    #[test]
    fn test_throttle_reject_before_logon_is_dropped() {
        let mut f = default_fixture();

        f.sender.on_throttle_reject(LIB, b"D", 11, 2, 0, b"ORD-7", 0);

        assert!(f.channel.written().is_empty());
        let errors = f.errors.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("configuration error"));
        assert!(errors[0].contains("before logon"));
    }

    #[test]
    fn test_throttle_reject_after_logon() {
        let mut f = default_fixture();
        f.sender.on_logon(
            SessionId::new(4),
            SessionKey::new(
                "FIX.4.4",
                CompId::new("GATEWAY").unwrap(),
                CompId::new("BROKER").unwrap(),
            ),
        );

        f.sender.on_throttle_reject(LIB, b"D", 11, 2, 0, b"ORD-7", 0);

        let written = f.channel.written();
        let text = String::from_utf8_lossy(&written);
        assert!(text.contains("35=j\x01"));
        assert!(text.contains("45=11\x01"));
        assert!(text.contains("372=D\x01"));
        assert!(text.contains("379=ORD-7\x01"));
        assert!(text.contains("380=99\x01"));
        assert!(text.contains("49=GATEWAY\x01"));
        assert_eq!(timing_seqs(&f), vec![2]);
        assert_eq!(f.sender.sender_sequence_number().get(), 2);
    }

    #[test]
    fn test_throttle_reject_wrong_library_is_dropped() {
        let mut f = default_fixture();

        f.sender
            .on_throttle_reject(LibraryId::new(8), b"D", 11, 2, 0, b"ORD-7", 0);

        assert_eq!(f.sender.invalid_library_attempts().get(), 1);
        assert!(f.channel.write_calls().is_empty());
    }

    #[test]
    fn test_sender_sequence_is_published() {
        let mut f = default_fixture();

        submit(&mut f, b"ONE", 12, 0);
        submit(&mut f, b"TWO", 13, 0);

        assert_eq!(f.sender.sender_sequence_number().get(), 13);
    }

    #[test]
    fn test_close_releases_buffers() {
        let mut f = default_fixture();

        f.channel.set_default_accept(Some(0));
        submit(&mut f, b"BACKLOG", 1, 0);
        assert!(f.sender.normal.is_allocated());

        f.sender.close();

        assert!(!f.sender.normal.is_allocated());
        assert!(!f.sender.replay.is_allocated());
        assert_eq!(f.sender.bytes_in_buffer().get(), 0);
        assert!(f.channel.is_closed());
    }

    #[test]
    fn test_start_replay_while_backlogged_is_parked() {
        let mut f = default_fixture();

        f.channel.set_default_accept(Some(0));
        submit(&mut f, b"N1", 1, 0);
        f.sender.on_start_replay(3);

        // Not replaying yet; the start marker waits on the replay buffer.
        assert!(!f.sender.is_replaying());
        assert_eq!(f.sender.replay.usage(), ENQ_CORRELATION_LEN);

        f.sender.on_replay_message(b"R1", 8, 0);

        f.channel.set_default_accept(None);
        f.sender.poll(1);
        f.sender.poll(2);

        assert_eq!(f.channel.written(), b"N1R1");
    }
}
