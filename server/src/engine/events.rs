use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::formatter::FormattedMessage;

/// Unique identifier for a live connection (one per socket, never reused).
pub type ConnectionId = Uuid;

/// Identifies one server incarnation. Clients compare it across reconnects to
/// tell whether the history they hold came from the same process.
pub type SessionId = Uuid;

/// Events pushed from the server to a connection.
///
/// Encoded as named events: `{"event": "chat message", "data": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full history replay, sent once right after connect.
    #[serde(rename = "chat history")]
    ChatHistory(HistoryReplay),

    /// A newly accepted message, sent to every connection.
    #[serde(rename = "chat message")]
    ChatMessage(FormattedMessage),
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReplay {
    pub session_id: SessionId,
    pub history: Vec<FormattedMessage>,
}

/// Events received from a connection. Payloads are untrusted and kept as raw
/// JSON so that non-string bodies can be coerced rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "set nickname")]
    SetNickname(Value),

    #[serde(rename = "chat message")]
    ChatMessage(Value),
}

impl ClientEvent {
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
