use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::{IdentityVerifier, JwtAuthority, TokenIssuer};
use crate::config::ServerConfig;
use crate::engine::LifecycleEngine;
use crate::registry::ConnectionRegistry;
use crate::relay::SignalRelay;

/// Everything a request or connection task needs. Cheap to clone; each
/// instance owns an isolated store and registry.
#[derive(Clone)]
pub struct AppState {
    engine: LifecycleEngine,
    relay: SignalRelay,
    verifier: Arc<dyn IdentityVerifier>,
    issuer: Arc<dyn TokenIssuer>,
    outbound_buffer: usize,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        issuer: Arc<dyn TokenIssuer>,
        outbound_buffer: usize,
    ) -> Self {
        let engine = LifecycleEngine::new(ConnectionRegistry::new());
        let relay = SignalRelay::new(engine.clone());
        Self {
            engine,
            relay,
            verifier,
            issuer,
            outbound_buffer,
            metrics: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let authority = Arc::new(JwtAuthority::new(
            config.token_secret.as_bytes(),
            config.token_ttl,
        ));
        Self::new(authority.clone(), authority, config.outbound_buffer)
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn relay(&self) -> &SignalRelay {
        &self.relay
    }

    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.verifier.as_ref()
    }

    pub fn issuer(&self) -> &dyn TokenIssuer {
        self.issuer.as_ref()
    }

    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }

    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}
