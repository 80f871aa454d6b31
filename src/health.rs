//! Liveness, readiness and process metrics.

use axum::{extract::State, http::header, response::IntoResponse, Json};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder, TEXT_FORMAT};
use serde::Serialize;
use std::time::Instant;

use crate::config::AuthMode;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub status: &'static str,
    pub auth_mode: AuthMode,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Ready as soon as state exists: configuration was validated when it was
/// built.
pub async fn ready(State(state): State<AppState>) -> Json<Readiness> {
    Json(Readiness {
        status: "ready",
        auth_mode: state.auth_mode(),
    })
}

/// Peak resident set size of this process, in bytes.
fn max_rss_bytes() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was filled in.
    let usage = unsafe { usage.assume_init() };
    let max_rss = u64::try_from(usage.ru_maxrss).ok()?;
    // Linux reports KiB, macOS bytes.
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * 1024)
    }
}

/// Process gauges exposed on `/api/metrics`, refreshed on each scrape.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    uptime: Gauge,
    max_rss: Gauge,
}

impl GatewayMetrics {
    pub fn new(mode: AuthMode) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let uptime = Gauge::with_opts(Opts::new(
            "process_uptime_seconds",
            "Seconds since the gateway started.",
        ))?;
        registry.register(Box::new(uptime.clone()))?;

        let max_rss = Gauge::with_opts(Opts::new(
            "process_max_resident_memory_bytes",
            "Peak resident memory in bytes.",
        ))?;
        registry.register(Box::new(max_rss.clone()))?;

        let auth_mode = GaugeVec::new(
            Opts::new("gateway_auth_mode_info", "Active authentication mode."),
            &["mode"],
        )?;
        registry.register(Box::new(auth_mode.clone()))?;
        // Fixed for the life of the process.
        let mode = mode.to_string();
        auth_mode.with_label_values(&[mode.as_str()]).set(1.0);

        Ok(Self {
            registry,
            uptime,
            max_rss,
        })
    }

    /// Refresh the process gauges and render the registry as Prometheus text.
    pub fn encode_text(&self, started_at: Instant) -> Result<String, ApiError> {
        self.uptime.set(started_at.elapsed().as_secs_f64());
        if let Some(rss) = max_rss_bytes() {
            self.max_rss.set(rss as f64);
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {e}")))
    }
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.encode_text(state.started_at)?;
    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], body))
}
