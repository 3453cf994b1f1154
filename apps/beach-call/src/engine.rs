//! Session lifecycle state machine.
//!
//! Every transition runs as one read-modify step under the exclusive store
//! lock, and its notifications are queued before the lock is released. Each
//! channel therefore sees updates in the order the store applied them.
//! Registry sends are non-blocking `try_send`s, so holding the lock while
//! queueing never waits on a slow socket.

use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::session::{Identity, Session, SessionStatus};
use crate::store::{InvariantViolation, SessionStore};

#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<RwLock<SessionStore>>,
    registry: ConnectionRegistry,
}

/// What a connection teardown did to the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnection {
    /// A newer connection owns the identity; nothing was touched.
    Superseded,
    /// Channel unregistered; the identity had no session.
    Idle,
    /// Channel unregistered and the identity's session torn down.
    Ended(Session),
}

/// Result of one transition: the snapshot to return and who to tell.
type Applied = (Session, Vec<Identity>);

impl LifecycleEngine {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            store: Arc::new(RwLock::new(SessionStore::new())),
            registry,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Start a call from `initiator` to `target`. The target is notified.
    pub fn create(&self, initiator: &str, target: &str, kind: &str) -> Result<Session, SessionError> {
        self.transition("create", initiator, |store| {
            if store.is_engaged(initiator) {
                return Err(SessionError::AlreadyInSession);
            }
            if store.is_engaged(target) {
                return Err(SessionError::TargetBusy);
            }
            if initiator == target {
                return Err(SessionError::SelfTarget);
            }

            let session = Session::new(initiator, target, kind);
            store.insert(session.clone());
            counter!("beach_call_sessions_created_total").increment(1);
            Ok((session, vec![target.to_string()]))
        })
    }

    /// Current session of `identity`, read under the shared lock.
    pub fn get(&self, identity: &str) -> Result<Session, SessionError> {
        self.store.read().session_for(identity).cloned()
    }

    /// Target answers a pending call. Both parties are notified.
    pub fn accept(&self, actor: &str) -> Result<Session, SessionError> {
        self.transition("accept", actor, |store| {
            let session = store.session_for_mut(actor)?;
            if session.target != actor {
                return Err(SessionError::Forbidden);
            }
            if session.status != SessionStatus::Pending {
                return Err(SessionError::InvalidState);
            }

            session.status = SessionStatus::Active;
            let recipients = vec![session.caller.clone(), session.target.clone()];
            Ok((session.clone(), recipients))
        })
    }

    /// Target rejects the call. The caller is notified and the session is
    /// removed; the terminal snapshot is returned.
    pub fn decline(&self, actor: &str) -> Result<Session, SessionError> {
        self.transition("decline", actor, |store| {
            let session = store.session_for(actor)?;
            if session.target != actor {
                return Err(SessionError::Forbidden);
            }

            let session_id = session.id.clone();
            let mut session = store
                .remove(&session_id)
                .ok_or(SessionError::SessionNotFound)?;
            session.status = SessionStatus::Declined;
            let recipients = vec![session.caller.clone()];
            Ok((session, recipients))
        })
    }

    /// Either party ends the call. The other party is notified and the
    /// session is removed; the terminal snapshot is returned.
    pub fn cancel(&self, actor: &str) -> Result<Session, SessionError> {
        self.transition("cancel", actor, |store| {
            let session_id = store.session_for(actor)?.id.clone();
            let mut session = store
                .remove(&session_id)
                .ok_or(SessionError::SessionNotFound)?;
            session.status = SessionStatus::Cancelled;
            let recipients = session
                .counterpart(actor)
                .map(|other| vec![other.to_string()])
                .unwrap_or_default();
            Ok((session, recipients))
        })
    }

    /// Teardown of `actor`'s channel.
    ///
    /// Unregisters the channel and ends any session the identity is part of,
    /// notifying the other party. A connection that was superseded by a newer
    /// registration for the same identity leaves everything alone.
    pub fn disconnect(&self, actor: &str, connection: ConnectionId) -> Disconnection {
        let ended = {
            let mut store = self.store.write();
            if !self.registry.unregister_connection(actor, connection) {
                return Disconnection::Superseded;
            }

            let Some(session_id) = store.session_id_for(actor).map(str::to_owned) else {
                return Disconnection::Idle;
            };
            let Some(mut session) = store.remove(&session_id) else {
                return Disconnection::Idle;
            };
            gauge!("beach_call_sessions_active").set(store.len() as f64);
            session.status = SessionStatus::Disconnected;
            if let Some(other) = session.counterpart(actor) {
                self.registry
                    .send(other, ServerEvent::SessionUpdated(session.clone()));
            }
            session
        };

        info!(
            operation = "disconnect",
            identity = %actor,
            session_id = %ended.id,
            status = %ended.status,
            "session transition"
        );
        counter!(
            "beach_call_session_transitions_total",
            "status" => ended.status.as_str()
        )
        .increment(1);

        Disconnection::Ended(ended)
    }

    pub fn active_sessions(&self) -> usize {
        self.store.read().len()
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.store.read().check_invariants()
    }

    /// Shared view of the store for read-only collaborators such as the relay.
    pub(crate) fn read_store(&self) -> RwLockReadGuard<'_, SessionStore> {
        self.store.read()
    }

    fn transition<F>(&self, operation: &'static str, actor: &str, apply: F) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut SessionStore) -> Result<Applied, SessionError>,
    {
        let outcome = {
            let mut store = self.store.write();
            let outcome = apply(&mut store);
            gauge!("beach_call_sessions_active").set(store.len() as f64);
            if let Ok((session, recipients)) = &outcome {
                for recipient in recipients {
                    self.registry
                        .send(recipient, ServerEvent::SessionUpdated(session.clone()));
                }
            }
            outcome
        };

        match outcome {
            Ok((session, _)) => {
                info!(
                    operation,
                    identity = %actor,
                    session_id = %session.id,
                    status = %session.status,
                    "session transition"
                );
                counter!(
                    "beach_call_session_transitions_total",
                    "status" => session.status.as_str()
                )
                .increment(1);
                Ok(session)
            }
            Err(err) => {
                debug!(
                    operation,
                    identity = %actor,
                    reason = err.reason(),
                    "session transition rejected"
                );
                counter!(
                    "beach_call_session_errors_total",
                    "reason" => err.reason()
                )
                .increment(1);
                Err(err)
            }
        }
    }
}
