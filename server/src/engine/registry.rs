use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::events::ConnectionId;

/// Nickname used until a connection picks one, and whenever it picks a blank one.
pub const DEFAULT_NICKNAME: &str = "Anon";

/// Address reported for a connection id that is not (or no longer) registered.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Prefix the OS puts in front of IPv4 peers accepted on a dual-stack socket.
const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// The (address, nickname) pair bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionIdentity {
    pub address: String,
    pub nickname: String,
}

impl ConnectionIdentity {
    pub fn new(address: &str) -> Self {
        Self {
            address: normalize_address(address).to_string(),
            nickname: DEFAULT_NICKNAME.to_string(),
        }
    }

    /// Fallback identity handed out for ids that are not registered.
    pub fn unregistered() -> Self {
        Self {
            address: UNKNOWN_ADDRESS.to_string(),
            nickname: DEFAULT_NICKNAME.to_string(),
        }
    }
}

/// Where a registered connection is in its lifecycle. Disconnected connections
/// are simply absent from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected with the default identity.
    Connected,
    /// Has set a nickname at least once. Purely cosmetic; nothing is gated on it.
    Identified,
}

#[derive(Debug)]
struct Entry {
    identity: ConnectionIdentity,
    state: SessionState,
    connected_at: DateTime<Utc>,
}

/// Identity of every live connection, keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: DashMap<ConnectionId, Entry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fresh default identity to `connection_id`. Registering an id
    /// twice resets it to the default identity.
    pub fn register(&self, connection_id: ConnectionId, address: &str) -> ConnectionIdentity {
        let identity = ConnectionIdentity::new(address);
        self.entries.insert(
            connection_id,
            Entry {
                identity: identity.clone(),
                state: SessionState::Connected,
                connected_at: Utc::now(),
            },
        );
        identity
    }

    /// Replace the nickname (last write wins). Returns the nickname actually
    /// stored, or `None` if the connection is not registered.
    pub fn set_nickname(&self, connection_id: ConnectionId, candidate: &str) -> Option<String> {
        let mut entry = self.entries.get_mut(&connection_id)?;
        let nickname = normalize_nickname(candidate);
        entry.identity.nickname.clone_from(&nickname);
        entry.state = SessionState::Identified;
        Some(nickname)
    }

    /// Current identity, or the unregistered fallback.
    pub fn get(&self, connection_id: ConnectionId) -> ConnectionIdentity {
        self.lookup(connection_id)
            .unwrap_or_else(ConnectionIdentity::unregistered)
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Option<ConnectionIdentity> {
        self.entries
            .get(&connection_id)
            .map(|e| e.identity.clone())
    }

    pub fn state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.entries.get(&connection_id).map(|e| e.state)
    }

    /// Drop the entry, returning its identity and when it registered.
    /// Unknown ids and repeated calls are no-ops.
    pub fn remove(
        &self,
        connection_id: ConnectionId,
    ) -> Option<(ConnectionIdentity, DateTime<Utc>)> {
        self.entries
            .remove(&connection_id)
            .map(|(_, entry)| (entry.identity, entry.connected_at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip the IPv4-mapped IPv6 prefix (`::ffff:1.2.3.4` -> `1.2.3.4`).
pub fn normalize_address(address: &str) -> &str {
    address.strip_prefix(IPV4_MAPPED_PREFIX).unwrap_or(address)
}

/// Trimmed nickname, or the default when nothing is left.
pub fn normalize_nickname(candidate: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        DEFAULT_NICKNAME.to_string()
    } else {
        trimmed.to_string()
    }
}
