use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::Session;

/// Events pushed from the server to a party's channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Lifecycle change; carries the full session, including terminal snapshots.
    SessionUpdated(Session),
    /// Opaque payload relayed verbatim from the other party.
    Signal(Value),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionUpdated(_) => "session_updated",
            ServerEvent::Signal(_) => "signal",
        }
    }
}

/// Raw inbound frame. The event name is kept as a string so unknown kinds
/// decode cleanly and can be ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Inbound events understood by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Signal(Value),
    Unrecognized(String),
}

impl From<InboundFrame> for ClientEvent {
    fn from(frame: InboundFrame) -> Self {
        match frame.event.as_str() {
            "signal" => ClientEvent::Signal(frame.data),
            _ => ClientEvent::Unrecognized(frame.event),
        }
    }
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str::<InboundFrame>(text).map(ClientEvent::from)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
