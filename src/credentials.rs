//! Credential forwarding: pick the caller's cookie or bearer token off an
//! inbound request and turn it into headers for the upstream call.

use axum::http::{header, HeaderMap, HeaderValue};
use std::sync::Arc;

use crate::config::AuthMode;

/// Session cookies issued by the CANFAR login service.
pub const SESSION_COOKIES: [&str; 2] = ["CADC_SSO", "JSESSIONID"];

/// Alternative header some clients use to carry the OIDC access token.
pub const TOKEN_HEADER: &str = "x-auth-token";

pub trait CredentialForwarder: Send + Sync {
    /// Headers to attach upstream. Empty when the caller sent no credential.
    fn forward(&self, inbound: &HeaderMap) -> HeaderMap;

    fn mode(&self) -> AuthMode;
}

/// Copies the named session cookies verbatim into a single `Cookie` header.
pub struct CookieForwarder {
    names: Vec<String>,
}

impl CookieForwarder {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for CookieForwarder {
    fn default() -> Self {
        Self::new(SESSION_COOKIES)
    }
}

impl CredentialForwarder for CookieForwarder {
    fn forward(&self, inbound: &HeaderMap) -> HeaderMap {
        let pairs: Vec<&str> = inbound
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .map(str::trim)
            .filter(|pair| match pair.split_once('=') {
                Some((name, _)) => self.names.iter().any(|n| n == name.trim()),
                None => false,
            })
            .collect();

        let mut out = HeaderMap::new();
        if pairs.is_empty() {
            return out;
        }
        if let Ok(value) = HeaderValue::from_str(&pairs.join("; ")) {
            out.insert(header::COOKIE, value);
        }
        out
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Canfar
    }
}

/// Forwards `Authorization: Bearer <token>`.
#[derive(Default)]
pub struct BearerForwarder;

impl BearerForwarder {
    pub fn token(inbound: &HeaderMap) -> Option<String> {
        let from_authorization = inbound
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                let (scheme, token) = v.trim().split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
            });
        let token = from_authorization.or_else(|| {
            inbound
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })?;
        (!token.is_empty()).then(|| token.to_string())
    }
}

impl CredentialForwarder for BearerForwarder {
    fn forward(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();
        if let Some(token) = Self::token(inbound) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                out.insert(header::AUTHORIZATION, value);
            }
        }
        out
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Oidc
    }
}

/// Select the forwarder for the deployment's auth mode. Called once at startup.
pub fn forwarder_for(mode: AuthMode) -> Arc<dyn CredentialForwarder> {
    match mode {
        AuthMode::Canfar => Arc::new(CookieForwarder::default()),
        AuthMode::Oidc => Arc::new(BearerForwarder),
    }
}
