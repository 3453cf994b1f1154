//! Call rendezvous and signaling relay.
//!
//! Two verified parties negotiate a call session over HTTP, then exchange
//! opaque signaling payloads through their websocket channels. The server
//! enforces who may talk to whom and never looks inside the payloads.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod websocket;

pub use engine::{Disconnection, LifecycleEngine};
pub use error::SessionError;
pub use session::{Identity, Session, SessionStatus};
pub use state::AppState;
