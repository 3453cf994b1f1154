use std::collections::HashMap;

use thiserror::Error;

use crate::error::SessionError;
use crate::session::{Identity, Session};

/// Sessions by id plus the identity -> session id index.
///
/// The two maps are kept in lockstep: a session is indexed under both of its
/// parties from the moment it is inserted until it is removed. Only the
/// lifecycle engine mutates the store, always under its write lock.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    by_identity: HashMap<Identity, String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("identity {identity} indexed to missing session {session_id}")]
    DanglingIndex { identity: Identity, session_id: String },
    #[error("identity {identity} indexed to session {session_id} it is not part of")]
    ForeignIndex { identity: Identity, session_id: String },
    #[error("session {session_id} party {identity} is not indexed to it")]
    MissingIndex { identity: Identity, session_id: String },
    #[error("session {session_id} has identical caller and target")]
    SelfSession { session_id: String },
    #[error("session {session_id} stored with terminal status")]
    TerminalStored { session_id: String },
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether the identity is currently party to a session.
    pub fn is_engaged(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    pub fn session_id_for(&self, identity: &str) -> Option<&str> {
        self.by_identity.get(identity).map(String::as_str)
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Resolve the identity's current session.
    ///
    /// `NoSession` when the identity is not indexed, `SessionNotFound` when
    /// the index points at nothing.
    pub fn session_for(&self, identity: &str) -> Result<&Session, SessionError> {
        let session_id = self
            .by_identity
            .get(identity)
            .ok_or(SessionError::NoSession)?;
        self.sessions
            .get(session_id)
            .ok_or(SessionError::SessionNotFound)
    }

    pub(crate) fn session_for_mut(&mut self, identity: &str) -> Result<&mut Session, SessionError> {
        let session_id = self
            .by_identity
            .get(identity)
            .ok_or(SessionError::NoSession)?;
        self.sessions
            .get_mut(session_id)
            .ok_or(SessionError::SessionNotFound)
    }

    #[cfg(test)]
    pub(crate) fn index_identity(&mut self, identity: &str, session_id: &str) {
        self.by_identity
            .insert(identity.to_string(), session_id.to_string());
    }

    /// Insert a new session and index both parties to it. Callers have
    /// already checked that neither party is engaged.
    pub(crate) fn insert(&mut self, session: Session) {
        debug_assert!(!self.is_engaged(&session.caller));
        debug_assert!(!self.is_engaged(&session.target));
        self.by_identity
            .insert(session.caller.clone(), session.id.clone());
        self.by_identity
            .insert(session.target.clone(), session.id.clone());
        self.sessions.insert(session.id.clone(), session);
    }

    /// Drop a session together with both of its index entries.
    pub(crate) fn remove(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        for party in [&session.caller, &session.target] {
            if self.by_identity.get(party).map(String::as_str) == Some(session_id) {
                self.by_identity.remove(party);
            }
        }
        Some(session)
    }

    /// Verify the store/index relationship. Cheap enough to run after every
    /// transition in tests.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (identity, session_id) in &self.by_identity {
            let Some(session) = self.sessions.get(session_id) else {
                return Err(InvariantViolation::DanglingIndex {
                    identity: identity.clone(),
                    session_id: session_id.clone(),
                });
            };
            if !session.involves(identity) {
                return Err(InvariantViolation::ForeignIndex {
                    identity: identity.clone(),
                    session_id: session_id.clone(),
                });
            }
        }

        for (session_id, session) in &self.sessions {
            if session.caller == session.target {
                return Err(InvariantViolation::SelfSession {
                    session_id: session_id.clone(),
                });
            }
            if session.status.is_terminal() {
                return Err(InvariantViolation::TerminalStored {
                    session_id: session_id.clone(),
                });
            }
            for party in [&session.caller, &session.target] {
                if self.by_identity.get(party) != Some(session_id) {
                    return Err(InvariantViolation::MissingIndex {
                        identity: party.clone(),
                        session_id: session_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
