use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::log_sink::LogSink;

use super::broadcast::BroadcastBus;
use super::events::{ClientEvent, ConnectionId, HistoryReplay, ServerEvent, SessionId};
use super::formatter::{FormattedMessage, coerce_text, format_message};
use super::history::HistoryLog;
use super::registry::{ConnectionIdentity, SessionRegistry, SessionState};
use super::user_session::{MAX_OUTBOUND_QUEUE, UserSession};

/// Tunables for a [`ChatEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// History cap with oldest-first eviction. Zero keeps everything.
    pub history_max_entries: usize,
    /// Write `connected from` / `disconnected from` lines to the log sink.
    pub audit_connections: bool,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            history_max_entries: 0,
            audit_connections: true,
            outbound_queue: MAX_OUTBOUND_QUEUE,
        }
    }
}

/// The session core. Transport-agnostic: the WebSocket handler (or a test)
/// feeds it connect/disconnect and client events, and drains each
/// connection's outbound receiver.
pub struct ChatEngine {
    registry: SessionRegistry,
    history: HistoryLog,
    bus: BroadcastBus,
    sink: LogSink,
    audit_connections: bool,
    outbound_queue: usize,
}

impl ChatEngine {
    pub fn new(sink: LogSink) -> Self {
        Self::with_options(sink, EngineOptions::default())
    }

    pub fn with_options(sink: LogSink, options: EngineOptions) -> Self {
        Self {
            registry: SessionRegistry::new(),
            history: HistoryLog::with_max_entries(options.history_max_entries),
            bus: BroadcastBus::new(),
            sink,
            audit_connections: options.audit_connections,
            // mpsc::channel panics on zero capacity
            outbound_queue: options.outbound_queue.max(1),
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Register a new connection from `address` and queue its history replay.
    /// Returns the connection id and the receiver the transport drains.
    pub fn connect(&self, address: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.outbound_queue);

        let identity = self.registry.register(connection_id, address);
        let session = Arc::new(UserSession::new(connection_id, tx));

        // Joining the bus and taking the snapshot under the history lock means
        // every message lands either in the replay or in the live stream, once.
        let replayed = self.history.snapshot_then(|history| {
            let count = history.len();
            self.bus.add(session);
            self.bus.send_to(
                connection_id,
                ServerEvent::ChatHistory(HistoryReplay {
                    session_id: self.history.session_id(),
                    history,
                }),
            );
            count
        });

        info!(%connection_id, address = %identity.address, replayed, "connection registered");
        if self.audit_connections {
            self.sink
                .dispatch(format!("connected from {}", identity.address));
        }

        (connection_id, rx)
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.bus.remove(connection_id);
        let Some((identity, connected_at)) = self.registry.remove(connection_id) else {
            return;
        };

        let connected_secs = (Utc::now() - connected_at).num_seconds();
        info!(
            %connection_id,
            address = %identity.address,
            connected_secs,
            "connection closed"
        );
        if self.audit_connections {
            self.sink
                .dispatch(format!("disconnected from {}", identity.address));
        }
    }

    // ── Client events ───────────────────────────────────────────────

    pub fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::SetNickname(candidate) => {
                self.set_nickname(connection_id, &candidate);
            }
            ClientEvent::ChatMessage(raw) => {
                self.send_message(connection_id, &raw);
            }
        }
    }

    /// Update the connection's nickname. Returns the stored nickname, or
    /// `None` if the connection is not registered.
    pub fn set_nickname(&self, connection_id: ConnectionId, candidate: &Value) -> Option<String> {
        let candidate = coerce_text(candidate);
        let nickname = self.registry.set_nickname(connection_id, &candidate);
        match &nickname {
            Some(nickname) => debug!(%connection_id, %nickname, "nickname set"),
            None => debug!(%connection_id, "ignoring nickname for unregistered connection"),
        }
        nickname
    }

    /// Format, record, broadcast and log one chat message. Returns `None` if
    /// the connection is not registered.
    pub fn send_message(&self, connection_id: ConnectionId, raw: &Value) -> Option<FormattedMessage> {
        let Some(identity) = self.registry.lookup(connection_id) else {
            debug!(%connection_id, "ignoring message from unregistered connection");
            return None;
        };

        let message = format_message(&identity.address, &identity.nickname, raw);

        // Sink dispatch stays inside the critical section so log order matches
        // history order; it only enqueues.
        let recipients = self.history.append_then(message.clone(), |message| {
            let recipients = self.bus.broadcast_all(message);
            self.sink.dispatch(message.as_str());
            recipients
        });

        info!(%connection_id, recipients, "{message}");
        Some(message)
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn session_id(&self) -> SessionId {
        self.history.session_id()
    }

    /// Identity of a connection, or the unregistered fallback.
    pub fn identity(&self, connection_id: ConnectionId) -> ConnectionIdentity {
        self.registry.get(connection_id)
    }

    pub fn session_state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.registry.state(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.bus.connection_count()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_snapshot(&self) -> Vec<FormattedMessage> {
        self.history.snapshot()
    }
}
