//! Shared application state.

use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{AuthMode, ConfigError, GatewayConfig};
use crate::credentials::{forwarder_for, CredentialForwarder};
use crate::health::GatewayMetrics;
use crate::upstream::UpstreamClient;

/// Everything a handler needs. Built once at startup and never mutated, so
/// the auth mode cannot change while serving.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub forwarder: Arc<dyn CredentialForwarder>,
    pub upstream: UpstreamClient,
    pub metrics: GatewayMetrics,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.ensure_servable()?;
        let upstream = UpstreamClient::new(&config)?;
        let metrics = GatewayMetrics::new(config.auth_mode)?;
        Ok(Self {
            forwarder: forwarder_for(config.auth_mode),
            metrics,
            config: Arc::new(config),
            upstream,
            started_at: Instant::now(),
        })
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.config.auth_mode
    }

    /// Upstream credential headers for an inbound request.
    pub fn credentials(&self, inbound: &HeaderMap) -> HeaderMap {
        self.forwarder.forward(inbound)
    }
}
