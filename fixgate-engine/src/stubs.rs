/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Scriptable stand-ins for the external seams, shared by the unit tests.
//!
//! `StubChannel` scripts exact per-call byte acceptance so tests can force
//! partial writes deterministically; the collecting stubs record everything
//! published through them.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use fixgate_core::{ConnectionId, DisconnectReason, ErrorHandler, GatewayError, LibraryId};

use crate::channel::TcpChannel;
use crate::publication::{Action, InboundPublication};
use crate::timing::MessageTimingHandler;

/// One scripted outcome for a `read_into` call.
pub(crate) enum ReadScript {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Default)]
struct ChannelState {
    /// Per-call byte quotas; consumed front to back.
    accepts: VecDeque<usize>,
    /// Quota applied when `accepts` is empty; `None` accepts everything.
    default_accept: Option<usize>,
    written: Vec<u8>,
    write_calls: Vec<(u32, bool, usize)>,
    fail_next_write: bool,
    inbound: VecDeque<ReadScript>,
    replay_completes: Vec<u64>,
    closed: bool,
}

/// A [`TcpChannel`] with scripted write acceptance and inbound data.
#[derive(Clone, Default)]
pub(crate) struct StubChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl StubChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scripts the byte quota for the next write call.
    pub(crate) fn push_accept(&self, quota: usize) {
        self.state.lock().unwrap().accepts.push_back(quota);
    }

    /// Sets the quota applied when no per-call script remains.
    pub(crate) fn set_default_accept(&self, quota: Option<usize>) {
        self.state.lock().unwrap().default_accept = quota;
    }

    pub(crate) fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_next_write = true;
    }

    /// Every byte accepted so far, in write order.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    /// `(seq_num, replay, accepted)` per write call.
    pub(crate) fn write_calls(&self) -> Vec<(u32, bool, usize)> {
        self.state.lock().unwrap().write_calls.clone()
    }

    pub(crate) fn replay_completes(&self) -> Vec<u64> {
        self.state.lock().unwrap().replay_completes.clone()
    }

    pub(crate) fn push_inbound(&self, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .inbound
            .push_back(ReadScript::Data(data.to_vec()));
    }

    pub(crate) fn push_eof(&self) {
        self.state.lock().unwrap().inbound.push_back(ReadScript::Eof);
    }

    pub(crate) fn push_read_error(&self, kind: io::ErrorKind) {
        self.state
            .lock()
            .unwrap()
            .inbound
            .push_back(ReadScript::Error(kind));
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl TcpChannel for StubChannel {
    fn write(&mut self, src: &[u8], seq_num: u32, replay: bool) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure"));
        }

        let quota = state.accepts.pop_front().or(state.default_accept);
        let accepted = quota.map_or(src.len(), |q| q.min(src.len()));
        state.written.extend_from_slice(&src[..accepted]);
        state.write_calls.push((seq_num, replay, accepted));
        Ok(accepted)
    }

    fn read_into(&mut self, dst: &mut BytesMut) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.inbound.pop_front() {
            Some(ReadScript::Data(data)) => {
                dst.extend_from_slice(&data);
                Ok(data.len())
            }
            Some(ReadScript::Eof) => Ok(0),
            Some(ReadScript::Error(kind)) => Err(kind.into()),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn on_replay_complete(&mut self, correlation_id: u64) {
        self.state
            .lock()
            .unwrap()
            .replay_completes
            .push(correlation_id);
    }

    fn remote_address(&self) -> String {
        "stub:0".to_string()
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Everything published on the bus, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PubEvent {
    Message(ConnectionId, Bytes),
    ReplayComplete(ConnectionId, u64),
    SlowStatus(LibraryId, ConnectionId, bool),
    Disconnect(LibraryId, ConnectionId, DisconnectReason),
}

#[derive(Default)]
struct PublicationState {
    events: Mutex<Vec<PubEvent>>,
    abort_replay_complete: AtomicBool,
}

/// An [`InboundPublication`] that records events and can script
/// back-pressure on the replay-complete signal.
#[derive(Clone, Default)]
pub(crate) struct CollectingPublication {
    state: Arc<PublicationState>,
}

impl CollectingPublication {
    pub(crate) fn set_abort_replay_complete(&self, abort: bool) {
        self.state
            .abort_replay_complete
            .store(abort, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<PubEvent> {
        self.state.events.lock().unwrap().clone()
    }

    pub(crate) fn replay_completes(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PubEvent::ReplayComplete(_, correlation_id) => Some(correlation_id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn slow_statuses(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PubEvent::SlowStatus(_, _, slow) => Some(slow),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PubEvent::Message(_, message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn disconnects(&self) -> Vec<(ConnectionId, DisconnectReason)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PubEvent::Disconnect(_, connection_id, reason) => Some((connection_id, reason)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: PubEvent) {
        self.state.events.lock().unwrap().push(event);
    }
}

impl InboundPublication for CollectingPublication {
    fn on_message(&self, connection_id: ConnectionId, message: Bytes) -> Action {
        self.record(PubEvent::Message(connection_id, message));
        Action::Continue
    }

    fn on_replay_complete(&self, connection_id: ConnectionId, correlation_id: u64) -> Action {
        if self.state.abort_replay_complete.load(Ordering::SeqCst) {
            return Action::Abort;
        }
        self.record(PubEvent::ReplayComplete(connection_id, correlation_id));
        Action::Continue
    }

    fn on_slow_status(&self, library_id: LibraryId, connection_id: ConnectionId, slow: bool) {
        self.record(PubEvent::SlowStatus(library_id, connection_id, slow));
    }

    fn on_disconnect(
        &self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) {
        self.record(PubEvent::Disconnect(library_id, connection_id, reason));
    }
}

/// A [`MessageTimingHandler`] recording `(seq_num, metadata)` per callback.
#[derive(Clone, Default)]
pub(crate) struct RecordingTiming {
    calls: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
}

impl RecordingTiming {
    pub(crate) fn timings(&self) -> Vec<(u32, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl MessageTimingHandler for RecordingTiming {
    fn on_message(&self, seq_num: u32, _connection_id: ConnectionId, metadata: &[u8]) {
        self.calls.lock().unwrap().push((seq_num, metadata.to_vec()));
    }
}

/// An [`ErrorHandler`] recording fault descriptions.
#[derive(Clone, Default)]
pub(crate) struct CollectingErrors {
    errors: Arc<Mutex<Vec<String>>>,
}

impl CollectingErrors {
    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl ErrorHandler for CollectingErrors {
    fn on_error(&self, error: &GatewayError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
