use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::engine::LifecycleEngine;
use crate::protocol::ServerEvent;
use crate::registry::Delivery;
use crate::session::{Identity, SessionStatus};

/// Forwards opaque signaling payloads between the two parties of an active
/// session. Reads the session store under the shared lock only.
#[derive(Clone)]
pub struct SignalRelay {
    engine: LifecycleEngine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded { to: Identity },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoSession,
    NotActive,
    PeerOffline,
    QueueFull,
    QueueClosed,
}

impl DropReason {
    pub fn metric_label(self) -> &'static str {
        match self {
            DropReason::NoSession => "no_session",
            DropReason::NotActive => "not_active",
            DropReason::PeerOffline => "peer_offline",
            DropReason::QueueFull => "queue_full",
            DropReason::QueueClosed => "queue_closed",
        }
    }
}

impl SignalRelay {
    pub fn new(engine: LifecycleEngine) -> Self {
        Self { engine }
    }

    pub fn relay(&self, sender: &str, payload: Value) -> RelayOutcome {
        let (counterpart, handle) = {
            let store = self.engine.read_store();
            let Some(session) = store
                .session_id_for(sender)
                .and_then(|session_id| store.get(session_id))
            else {
                return self.dropped(sender, DropReason::NoSession);
            };
            // Signals are only meaningful once both sides have agreed; this
            // also discards stragglers that race a cancel or decline.
            if session.status != SessionStatus::Active {
                return self.dropped(sender, DropReason::NotActive);
            }
            let Some(counterpart) = session.counterpart(sender).map(str::to_owned) else {
                return self.dropped(sender, DropReason::NoSession);
            };
            let handle = self.engine.registry().lookup(&counterpart);
            (counterpart, handle)
        };

        let Some(handle) = handle else {
            return self.dropped(sender, DropReason::PeerOffline);
        };
        match handle.send(ServerEvent::Signal(payload)) {
            Delivery::Queued => {
                debug!(from = %sender, to = %counterpart, "signal forwarded");
                counter!("beach_call_signals_relayed_total").increment(1);
                RelayOutcome::Forwarded { to: counterpart }
            }
            Delivery::QueueFull => self.dropped(sender, DropReason::QueueFull),
            Delivery::QueueClosed | Delivery::NotConnected => {
                self.dropped(sender, DropReason::QueueClosed)
            }
        }
    }

    fn dropped(&self, sender: &str, reason: DropReason) -> RelayOutcome {
        debug!(from = %sender, reason = reason.metric_label(), "signal dropped");
        counter!(
            "beach_call_signals_dropped_total",
            "reason" => reason.metric_label()
        )
        .increment(1);
        RelayOutcome::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        engine: LifecycleEngine,
        relay: SignalRelay,
    }

    impl Fixture {
        fn new() -> Self {
            let engine = LifecycleEngine::new(ConnectionRegistry::new());
            let relay = SignalRelay::new(engine.clone());
            Self { engine, relay }
        }

        fn connect(&self, identity: &str) -> mpsc::Receiver<Outbound> {
            let (handle, rx) = ConnectionHandle::channel(16);
            self.engine.registry().register(identity, handle);
            rx
        }
    }

    fn signals(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Event(ServerEvent::Signal(payload)) = outbound {
                out.push(payload);
            }
        }
        out
    }

    #[test]
    fn pending_session_relays_nothing() {
        let fx = Fixture::new();
        let mut bob_rx = fx.connect("bob");
        fx.engine.create("alice", "bob", "video").unwrap();

        let outcome = fx.relay.relay("alice", json!({"sdp": "offer"}));
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotActive));
        assert!(signals(&mut bob_rx).is_empty());
    }

    #[test]
    fn active_session_forwards_payload_verbatim_to_counterpart_only() {
        let fx = Fixture::new();
        let mut alice_rx = fx.connect("alice");
        let mut bob_rx = fx.connect("bob");
        let mut carol_rx = fx.connect("carol");
        fx.engine.create("alice", "bob", "video").unwrap();
        fx.engine.accept("bob").unwrap();

        let payload = json!({"type": "offer", "sdp": "v=0", "extra": [1, {"x": true}]});
        assert_eq!(
            fx.relay.relay("alice", payload.clone()),
            RelayOutcome::Forwarded { to: "bob".into() }
        );
        assert_eq!(signals(&mut bob_rx), vec![payload]);
        assert!(signals(&mut alice_rx).is_empty());
        assert!(signals(&mut carol_rx).is_empty());

        let answer = json!({"type": "answer"});
        assert_eq!(
            fx.relay.relay("bob", answer.clone()),
            RelayOutcome::Forwarded { to: "alice".into() }
        );
        assert_eq!(signals(&mut alice_rx), vec![answer]);
    }

    #[test]
    fn sender_without_session_is_dropped() {
        let fx = Fixture::new();
        assert_eq!(
            fx.relay.relay("alice", json!({})),
            RelayOutcome::Dropped(DropReason::NoSession)
        );
    }

    #[test]
    fn offline_counterpart_is_dropped() {
        let fx = Fixture::new();
        fx.engine.create("alice", "bob", "video").unwrap();
        fx.engine.accept("bob").unwrap();
        assert_eq!(
            fx.relay.relay("alice", json!({})),
            RelayOutcome::Dropped(DropReason::PeerOffline)
        );
    }

    #[test]
    fn signals_after_cancel_are_dropped() {
        let fx = Fixture::new();
        let mut bob_rx = fx.connect("bob");
        fx.engine.create("alice", "bob", "video").unwrap();
        fx.engine.accept("bob").unwrap();
        fx.engine.cancel("bob").unwrap();

        assert_eq!(
            fx.relay.relay("alice", json!({"late": true})),
            RelayOutcome::Dropped(DropReason::NoSession)
        );
        assert!(signals(&mut bob_rx).is_empty());
    }
}
