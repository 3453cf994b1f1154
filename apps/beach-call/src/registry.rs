use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::session::Identity;

pub type ConnectionId = Uuid;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Ask the writer to close the socket with the given reason.
    Close(&'static str),
}

/// Result of a best-effort send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    NotConnected,
    QueueFull,
    QueueClosed,
}

impl Delivery {
    pub fn is_queued(self) -> bool {
        matches!(self, Delivery::Queued)
    }

    fn metric_label(self) -> &'static str {
        match self {
            Delivery::Queued => "queued",
            Delivery::NotConnected => "not_connected",
            Delivery::QueueFull => "queue_full",
            Delivery::QueueClosed => "queue_closed",
        }
    }
}

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Non-blocking enqueue; per-connection order is the order of calls.
    pub fn send(&self, event: ServerEvent) -> Delivery {
        match self.tx.try_send(Outbound::Event(event)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::QueueFull,
            Err(TrySendError::Closed(_)) => Delivery::QueueClosed,
        }
    }

    pub fn close(&self, reason: &'static str) -> Delivery {
        match self.tx.try_send(Outbound::Close(reason)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::QueueFull,
            Err(TrySendError::Closed(_)) => Delivery::QueueClosed,
        }
    }
}

/// Identity -> live connection. At most one connection per identity; a new
/// registration replaces the old one.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Identity, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the handle for `identity`, returning the one it superseded.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections.insert(identity.to_string(), handle);
        gauge!("beach_call_connections_active").set(self.connections.len() as f64);
        previous
    }

    pub fn unregister(&self, identity: &str) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(identity).map(|(_, handle)| handle);
        gauge!("beach_call_connections_active").set(self.connections.len() as f64);
        removed
    }

    /// Remove the entry only if it still belongs to `connection`. Returns
    /// false when a newer connection has taken over (or none is registered).
    pub fn unregister_connection(&self, identity: &str, connection: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, handle| handle.id == connection)
            .is_some();
        gauge!("beach_call_connections_active").set(self.connections.len() as f64);
        removed
    }

    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections
            .get(identity)
            .map(|entry| entry.value().clone())
    }

    /// Best-effort delivery. Missing or saturated channels drop the event.
    pub fn send(&self, identity: &str, event: ServerEvent) -> Delivery {
        let kind = event.kind();
        // Clone the handle so no map guard is held while enqueueing.
        let delivery = match self.lookup(identity) {
            Some(handle) => handle.send(event),
            None => Delivery::NotConnected,
        };
        if !delivery.is_queued() {
            debug!(
                identity = %identity,
                event = kind,
                outcome = delivery.metric_label(),
                "event dropped"
            );
            counter!(
                "beach_call_notifications_dropped_total",
                "reason" => delivery.metric_label()
            )
            .increment(1);
        }
        delivery
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
