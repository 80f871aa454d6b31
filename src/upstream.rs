//! Outbound HTTP to the login, workload (SKAHA) and storage services.
//!
//! One `reqwest::Client` per service so each carries its own timeout. Every
//! inbound request produces at most one call per upstream; nothing is
//! retried or cached.

use axum::http::{header, HeaderMap, Method, StatusCode};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{ConfigError, GatewayConfig};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// CANFAR login/whoami and user lookup.
    Login,
    /// Workload service that owns session lifecycle.
    Skaha,
    /// VOSpace storage.
    Storage,
}

impl Service {
    fn name(self) -> &'static str {
        match self {
            Service::Login => "login",
            Service::Skaha => "skaha",
            Service::Storage => "storage",
        }
    }
}

#[derive(Clone)]
pub struct UpstreamClient {
    login: Client,
    skaha: Client,
    storage: Client,
    login_base: Url,
    skaha_base: Url,
    storage_base: Url,
}

/// A fully buffered upstream answer.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::Upstream(format!("Invalid response from upstream: {e}")))
    }

    /// JSON when the body parses, the raw text otherwise.
    pub fn json_or_text(&self) -> serde_json::Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.body.trim().to_string()))
    }

    pub fn into_error(self, resource: &str, action: &str) -> ApiError {
        ApiError::from_upstream(self.status, &self.body, resource, action)
    }
}

fn base_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    match Url::parse(value) {
        Ok(url) if !url.cannot_be_a_base() => Ok(url),
        _ => Err(ConfigError::InvalidUrl {
            var,
            value: value.to_string(),
        }),
    }
}

impl UpstreamClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let build = |timeout: Duration| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ConfigError::HttpClient(e.to_string()))
        };
        Ok(Self {
            login: build(config.timeouts.login)?,
            skaha: build(config.timeouts.skaha)?,
            storage: build(config.timeouts.storage)?,
            login_base: base_url("LOGIN_API", &config.upstreams.login)?,
            skaha_base: base_url("SKAHA_API", &config.upstreams.skaha)?,
            storage_base: base_url("STORAGE_API", &config.upstreams.storage)?,
        })
    }

    fn client(&self, service: Service) -> &Client {
        match service {
            Service::Login => &self.login,
            Service::Skaha => &self.skaha,
            Service::Storage => &self.storage,
        }
    }

    pub fn base(&self, service: Service) -> &Url {
        match service {
            Service::Login => &self.login_base,
            Service::Skaha => &self.skaha_base,
            Service::Storage => &self.storage_base,
        }
    }

    /// Start a request to `path` under the service's base URL, with the
    /// caller's forwarded credentials attached.
    ///
    /// `path` is split on `/` and each piece is appended as one literal
    /// segment, so `%`, `?` and `#` are escaped rather than interpreted and
    /// dot segments are dropped.
    pub fn request(
        &self,
        service: Service,
        method: Method,
        path: &str,
        credentials: HeaderMap,
    ) -> RequestBuilder {
        let url = self.url(service, path);
        self.client(service)
            .request(method, url)
            .headers(credentials)
    }

    pub fn url(&self, service: Service, path: &str) -> Url {
        let mut url = self.base(service).clone();
        // Bases are checked to be hierarchical in `base_url`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url
    }

    /// Like [`request`](Self::request) but against an absolute URL, using the
    /// service's client and timeout.
    pub fn request_url(
        &self,
        service: Service,
        method: Method,
        url: &str,
        credentials: HeaderMap,
    ) -> RequestBuilder {
        self.client(service)
            .request(method, url)
            .headers(credentials)
    }

    pub async fn send(
        &self,
        service: Service,
        builder: RequestBuilder,
    ) -> Result<UpstreamResponse, ApiError> {
        let request = builder
            .build()
            .map_err(|e| ApiError::Internal(format!("Failed to build upstream request: {e}")))?;
        let method = request.method().clone();
        let url = request.url().clone();
        let started = Instant::now();

        let response = self.client(service).execute(request).await.map_err(|e| {
            warn!(
                service = service.name(),
                %method,
                url = %url.path(),
                timeout = e.is_timeout(),
                "upstream request failed: {e}"
            );
            if e.is_timeout() {
                ApiError::Upstream(format!("{} service timed out", service.name()))
            } else {
                ApiError::Upstream(format!("{} service unavailable", service.name()))
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| {
            ApiError::Upstream(format!("Failed to read {} response: {e}", service.name()))
        })?;

        debug!(
            service = service.name(),
            %method,
            url = %url.path(),
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream call"
        );

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
