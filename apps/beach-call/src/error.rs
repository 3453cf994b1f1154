use thiserror::Error;

/// Precondition failures of the session lifecycle. Always surfaced to the
/// requester; nothing is retried or rolled back on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("already in an active session")]
    AlreadyInSession,
    #[error("target is busy")]
    TargetBusy,
    #[error("cannot call yourself")]
    SelfTarget,
    #[error("only the target may perform this action")]
    Forbidden,
    #[error("session is not pending")]
    InvalidState,
    #[error("no active session")]
    NoSession,
    #[error("session not found")]
    SessionNotFound,
}

impl SessionError {
    /// Stable label used for metrics and error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::AlreadyInSession => "already_in_session",
            SessionError::TargetBusy => "target_busy",
            SessionError::SelfTarget => "self_target",
            SessionError::Forbidden => "forbidden",
            SessionError::InvalidState => "invalid_state",
            SessionError::NoSession => "no_session",
            SessionError::SessionNotFound => "session_not_found",
        }
    }
}
