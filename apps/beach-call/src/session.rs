use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Verified name of a party, as produced by the identity verifier.
pub type Identity = String;

/// Generate a new session ID
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Declined,
    Cancelled,
    Disconnected,
}

impl SessionStatus {
    /// Terminal statuses only ever exist on snapshots handed out by the
    /// transition that produced them; the store never holds one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Declined | SessionStatus::Cancelled | SessionStatus::Disconnected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Declined => "declined",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call negotiation between a caller and a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "sessionId")]
    pub id: String,
    pub caller: Identity,
    pub target: Identity,
    pub status: SessionStatus,
    /// Category tag such as "video" or "audio"; never interpreted.
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(caller: &str, target: &str, kind: &str) -> Self {
        Self {
            id: generate_session_id(),
            caller: caller.to_string(),
            target: target.to_string(),
            status: SessionStatus::Pending,
            kind: kind.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn involves(&self, identity: &str) -> bool {
        self.caller == identity || self.target == identity
    }

    /// The other party, or `None` when `identity` is not part of the session.
    pub fn counterpart(&self, identity: &str) -> Option<&str> {
        if self.caller == identity {
            Some(&self.target)
        } else if self.target == identity {
            Some(&self.caller)
        } else {
            None
        }
    }
}
