/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! The framer: the single-threaded event loop that owns every endpoint.
//!
//! The framer holds the connection table, dispatches library commands to
//! sender endpoints, drives inbound reads, and calls `poll` on every
//! endpoint each tick. Endpoints never block and never suspend; "waiting"
//! is always the framer re-invoking `poll` on the next tick. Disconnects
//! requested by either endpoint of a pair are routed here, so teardown of
//! the pair is always coordinated in one place.

use std::collections::HashMap;

use bytes::Bytes;
use fixgate_core::{
    ConnectionId, DisconnectReason, ErrorHandler, LibraryId, SessionId, SessionKey, Timestamp,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::TcpChannel;
use crate::config::EngineConfig;
use crate::fixp::FixpSenderEndpoint;
use crate::publication::InboundPublication;
use crate::receiver::FixReceiverEndpoint;
use crate::sender::{FixSenderEndpoint, SenderEndpoint};
use crate::timing::MessageTimingHandler;

const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Which wire protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Classic tag=value FIX.
    Fix,
    /// Binary FIXP.
    Fixp,
}

/// Commands submitted to the framer by client libraries and the replayer.
#[derive(Debug)]
pub enum FramerCommand {
    /// A live outbound application message.
    Outbound {
        /// Target connection.
        connection_id: ConnectionId,
        /// Submitting library; must match the connection's owner.
        library_id: LibraryId,
        /// Complete FIX message bytes.
        body: Bytes,
        /// Opaque context returned through the timing callback.
        metadata: Bytes,
        /// Message sequence number.
        seq_num: u32,
        /// Sequence index of the session's sequence-number epoch.
        sequence_index: i32,
        /// MsgType of the message, for logging.
        msg_type: Bytes,
    },
    /// A synthetic Business Message Reject for a throttled message.
    ThrottleReject {
        /// Target connection.
        connection_id: ConnectionId,
        /// Submitting library; must match the connection's owner.
        library_id: LibraryId,
        /// MsgType of the message being rejected.
        ref_msg_type: Bytes,
        /// Sequence number of the message being rejected.
        ref_seq_num: u32,
        /// Sequence number for the reject itself.
        seq_num: u32,
        /// Sequence index of the session's sequence-number epoch.
        sequence_index: i32,
        /// Order/request id being rejected.
        business_reject_ref_id: Bytes,
    },
    /// One frame from the archive replay reader.
    ReplayMessage {
        /// Target connection.
        connection_id: ConnectionId,
        /// Complete FIX message bytes.
        body: Bytes,
        /// Real sequence number for the burst's terminal frame,
        /// `NOT_LAST_REPLAY_MSG` otherwise.
        seq_num: u32,
    },
    /// A replay burst is about to begin.
    StartReplay {
        /// Target connection.
        connection_id: ConnectionId,
        /// Burst identity.
        correlation_id: u64,
    },
    /// Terminal sentinel for a replay burst.
    ReplayComplete {
        /// Target connection.
        connection_id: ConnectionId,
        /// Burst identity.
        correlation_id: u64,
    },
    /// A resend request passed validation; observational.
    ValidResendRequest {
        /// Target connection.
        connection_id: ConnectionId,
        /// Burst identity.
        correlation_id: u64,
    },
    /// Reconfigures the connection's throttle reject window.
    ConfigureThrottle {
        /// Target connection.
        connection_id: ConnectionId,
        /// Window quoted in reject messages.
        window_ms: u64,
        /// Limit quoted in reject messages.
        limit: usize,
    },
    /// Installs the session identity established at logon.
    Logon {
        /// Target connection.
        connection_id: ConnectionId,
        /// Session identity.
        session_id: SessionId,
        /// Session comp-id key.
        session_key: SessionKey,
    },
    /// Administrative disconnect.
    Disconnect {
        /// Target connection.
        connection_id: ConnectionId,
    },
}

/// Cloneable submitter for [`FramerCommand`]s.
#[derive(Debug, Clone)]
pub struct FramerHandle {
    commands: mpsc::Sender<FramerCommand>,
}

impl FramerHandle {
    /// Submits a command, waiting for queue space.
    pub async fn send(&self, command: FramerCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Submits a command without waiting; false when the queue is full or
    /// the framer is gone.
    pub fn try_send(&self, command: FramerCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }
}

struct Connection {
    sender: SenderEndpoint,
    receiver: FixReceiverEndpoint,
}

/// The endpoint table and its cooperative event loop.
pub struct Framer {
    config: EngineConfig,
    publication: Arc<dyn InboundPublication>,
    error_handler: Arc<dyn ErrorHandler>,
    timing: Option<Arc<dyn MessageTimingHandler>>,
    connections: HashMap<ConnectionId, Connection>,
    commands: Option<mpsc::Receiver<FramerCommand>>,
    next_connection_id: u64,
}

impl Framer {
    /// Creates a framer with an empty connection table, returning the
    /// command submitter alongside it. The loop in [`Framer::run`] stops
    /// once every clone of the handle is dropped.
    pub fn new(
        config: EngineConfig,
        publication: Arc<dyn InboundPublication>,
        error_handler: Arc<dyn ErrorHandler>,
        timing: Option<Arc<dyn MessageTimingHandler>>,
    ) -> (Self, FramerHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let framer = Self {
            config,
            publication,
            error_handler,
            timing,
            connections: HashMap::new(),
            commands: Some(commands_rx),
            next_connection_id: 1,
        };
        (
            framer,
            FramerHandle {
                commands: commands_tx,
            },
        )
    }

    /// Registers an accepted or initiated connection, creating its endpoint
    /// pair.
    pub fn on_connection(
        &mut self,
        channel: Box<dyn TcpChannel>,
        library_id: LibraryId,
        kind: ConnectionKind,
    ) -> ConnectionId {
        let connection_id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id += 1;
        let now_ms = Timestamp::now().as_millis();

        info!(
            %connection_id,
            %library_id,
            ?kind,
            remote = %channel.remote_address(),
            "connection registered"
        );

        let sender = match kind {
            ConnectionKind::Fix => SenderEndpoint::Fix(FixSenderEndpoint::new(
                connection_id,
                library_id,
                channel,
                Arc::clone(&self.publication),
                Arc::clone(&self.error_handler),
                self.timing.clone(),
                &self.config,
                now_ms,
            )),
            ConnectionKind::Fixp => SenderEndpoint::Fixp(FixpSenderEndpoint::new(
                connection_id,
                library_id,
                channel,
                Arc::clone(&self.publication),
                Arc::clone(&self.error_handler),
                self.timing.clone(),
                &self.config,
                now_ms,
            )),
        };
        let receiver = FixReceiverEndpoint::new(
            connection_id,
            library_id,
            Arc::clone(&self.publication),
            Arc::clone(&self.error_handler),
            &self.config,
        );

        self.connections
            .insert(connection_id, Connection { sender, receiver });
        connection_id
    }

    /// Dispatches one command to its endpoint.
    pub fn on_command(&mut self, command: FramerCommand, now_ms: u64) {
        match command {
            FramerCommand::Outbound {
                connection_id,
                library_id,
                body,
                metadata,
                seq_num,
                sequence_index,
                msg_type,
            } => {
                let Some(connection) = self.connections.get_mut(&connection_id) else {
                    return warn_unknown(connection_id);
                };
                match &mut connection.sender {
                    SenderEndpoint::Fix(endpoint) => endpoint.on_outbound_message(
                        library_id,
                        &body,
                        &metadata,
                        seq_num,
                        sequence_index,
                        &msg_type,
                        now_ms,
                    ),
                    SenderEndpoint::Fixp(endpoint) => {
                        endpoint.on_message(&body, seq_num, false, now_ms);
                    }
                }
                self.sweep(connection_id);
            }
            FramerCommand::ThrottleReject {
                connection_id,
                library_id,
                ref_msg_type,
                ref_seq_num,
                seq_num,
                sequence_index,
                business_reject_ref_id,
            } => {
                let Some(endpoint) = self.fix_sender_mut(connection_id) else {
                    return warn_unknown(connection_id);
                };
                endpoint.on_throttle_reject(
                    library_id,
                    &ref_msg_type,
                    ref_seq_num,
                    seq_num,
                    sequence_index,
                    &business_reject_ref_id,
                    now_ms,
                );
                self.sweep(connection_id);
            }
            FramerCommand::ReplayMessage {
                connection_id,
                body,
                seq_num,
            } => {
                let Some(endpoint) = self.fix_sender_mut(connection_id) else {
                    return warn_unknown(connection_id);
                };
                endpoint.on_replay_message(&body, seq_num, now_ms);
                self.sweep(connection_id);
            }
            FramerCommand::StartReplay {
                connection_id,
                correlation_id,
            } => {
                let Some(endpoint) = self.fix_sender_mut(connection_id) else {
                    return warn_unknown(connection_id);
                };
                endpoint.on_start_replay(correlation_id);
                self.sweep(connection_id);
            }
            FramerCommand::ReplayComplete {
                connection_id,
                correlation_id,
            } => {
                let Some(endpoint) = self.fix_sender_mut(connection_id) else {
                    return warn_unknown(connection_id);
                };
                endpoint.on_replay_complete(correlation_id, now_ms);
                self.sweep(connection_id);
            }
            FramerCommand::ValidResendRequest {
                connection_id,
                correlation_id,
            } => {
                let Some(connection) = self.connections.get_mut(&connection_id) else {
                    return warn_unknown(connection_id);
                };
                connection.sender.on_valid_resend_request(correlation_id);
            }
            FramerCommand::ConfigureThrottle {
                connection_id,
                window_ms,
                limit,
            } => {
                let Some(endpoint) = self.fix_sender_mut(connection_id) else {
                    return warn_unknown(connection_id);
                };
                endpoint.configure_throttle(window_ms, limit);
            }
            FramerCommand::Logon {
                connection_id,
                session_id,
                session_key,
            } => {
                let Some(endpoint) = self.fix_sender_mut(connection_id) else {
                    return warn_unknown(connection_id);
                };
                endpoint.on_logon(session_id, session_key);
            }
            FramerCommand::Disconnect { connection_id } => {
                self.complete_disconnect(connection_id, DisconnectReason::LibraryDisconnect);
            }
        }
    }

    /// One cooperative tick: drain retries, enforce slow-consumer deadlines,
    /// pull inbound bytes, and route any requested disconnects.
    pub fn poll(&mut self, now_ms: u64) {
        let mut disconnects: Vec<(ConnectionId, DisconnectReason)> = Vec::new();

        for (connection_id, connection) in &mut self.connections {
            let Connection { sender, receiver } = connection;
            sender.poll(now_ms);
            receiver.poll(sender.channel_mut(), now_ms);

            if let Some(reason) = sender
                .take_pending_disconnect()
                .or_else(|| receiver.take_pending_disconnect())
            {
                disconnects.push((*connection_id, reason));
            }
        }

        for (connection_id, reason) in disconnects {
            self.complete_disconnect(connection_id, reason);
        }
    }

    /// Tears down a connection pair and publishes the disconnect.
    pub fn complete_disconnect(&mut self, connection_id: ConnectionId, reason: DisconnectReason) {
        let Some(mut connection) = self.connections.remove(&connection_id) else {
            return;
        };
        info!(%connection_id, %reason, "connection disconnected");
        connection.sender.close();
        self.publication
            .on_disconnect(connection.sender.library_id(), connection_id, reason);
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs the cooperative loop until every [`FramerHandle`] is dropped.
    pub async fn run(mut self) {
        let Some(mut commands) = self.commands.take() else {
            return;
        };

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(poll_interval = ?self.config.poll_interval(), "framer loop started");

        loop {
            tokio::select! {
                maybe_command = commands.recv() => {
                    match maybe_command {
                        Some(command) => {
                            let now_ms = Timestamp::now().as_millis();
                            self.on_command(command, now_ms);
                            // Drain whatever arrived in the meantime before
                            // going back to sleep.
                            while let Ok(command) = commands.try_recv() {
                                self.on_command(command, now_ms);
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.poll(Timestamp::now().as_millis());
                }
            }
        }

        let connection_ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for connection_id in connection_ids {
            self.complete_disconnect(connection_id, DisconnectReason::EngineShutdown);
        }
        debug!("framer loop stopped");
    }

    fn fix_sender_mut(&mut self, connection_id: ConnectionId) -> Option<&mut FixSenderEndpoint> {
        self.connections
            .get_mut(&connection_id)
            .and_then(|connection| connection.sender.as_fix_mut())
    }

    /// Routes a disconnect requested by the sender while handling a command.
    fn sweep(&mut self, connection_id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };
        if let Some(reason) = connection.sender.take_pending_disconnect() {
            self.complete_disconnect(connection_id, reason);
        }
    }
}

fn warn_unknown(connection_id: ConnectionId) {
    warn!(%connection_id, "command for unknown connection dropped");
}
