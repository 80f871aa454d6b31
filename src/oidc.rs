//! OIDC authorization-code flow with PKCE.
//!
//! The browser keeps the verifier and `state` between the redirect and the
//! callback; this side discovers endpoints, mints the PKCE pair and performs
//! the code exchange. There is no refresh flow.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    Json,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::config::OidcConfig;
use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream::Service;

/// Browser storage keys the client persists the PKCE values under.
pub const VERIFIER_STORAGE_KEY: &str = "oidc_code_verifier";
pub const STATE_STORAGE_KEY: &str = "oidc_state";

const VERIFIER_LEN: usize = 64;
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier: String = (0..VERIFIER_LEN)
            .map(|_| VERIFIER_ALPHABET[rng.gen_range(0..VERIFIER_ALPHABET.len())] as char)
            .collect();
        Self::from_verifier(verifier)
    }

    /// S256 challenge for a given verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageKeys {
    pub verifier: &'static str,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub storage_keys: StorageKeys,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub code: Option<String>,
    #[serde(alias = "code_verifier")]
    pub code_verifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    /// Unix seconds. Informational only, nothing enforces it.
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub user: Option<Value>,
    pub redirect_url: String,
}

/// The OIDC config, or 404 when the deployment runs in cookie mode.
pub fn oidc_config(state: &AppState) -> Result<&OidcConfig, ApiError> {
    state
        .config
        .oidc
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("OIDC authentication is not enabled".to_string()))
}

pub async fn discover(state: &AppState, oidc: &OidcConfig) -> Result<Discovery, ApiError> {
    let request = state.upstream.request_url(
        Service::Login,
        Method::GET,
        &oidc.discovery_url(),
        HeaderMap::new(),
    );
    let failed = |reason: String| {
        warn!(issuer = %oidc.issuer, "OIDC discovery failed: {reason}");
        ApiError::Internal("Failed to discover OIDC endpoints".to_string())
    };
    let response = state
        .upstream
        .send(Service::Login, request)
        .await
        .map_err(|e| failed(e.to_string()))?;
    if !response.is_success() {
        return Err(failed(format!("status {}", response.status.as_u16())));
    }
    serde_json::from_str(&response.body).map_err(|e| failed(e.to_string()))
}

/// Unix seconds `secs` from now, or `None` when that does not fit.
pub fn expiry_from_now(secs: u64) -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|now| now.as_secs().checked_add(secs))
}

/// The `exp` claim of a JWT access token. Opaque tokens have none.
pub fn token_expiry(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let claims: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
    claims.get("exp")?.as_u64()
}

/// Outcome of a user-info request.
#[derive(Debug)]
pub enum UserInfo {
    Found(Value),
    /// The provider refused the token (401/403).
    Rejected,
    /// No endpoint, a transport failure, or an unusable answer.
    Unavailable,
}

impl UserInfo {
    pub fn into_user(self) -> Option<Value> {
        match self {
            UserInfo::Found(user) => Some(user),
            UserInfo::Rejected | UserInfo::Unavailable => None,
        }
    }
}

/// Ask the provider who `token` belongs to. Failures are logged, never raised.
pub async fn lookup_userinfo(state: &AppState, discovery: &Discovery, token: &str) -> UserInfo {
    let Some(endpoint) = discovery.userinfo_endpoint.as_deref() else {
        return UserInfo::Unavailable;
    };
    let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {token}")) else {
        return UserInfo::Rejected;
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, bearer);

    let request = state
        .upstream
        .request_url(Service::Login, Method::GET, endpoint, headers);
    match state.upstream.send(Service::Login, request).await {
        Ok(response) if response.is_success() => match response.json::<Value>() {
            Ok(user) => UserInfo::Found(user),
            Err(e) => {
                warn!("userinfo response was not JSON: {e}");
                UserInfo::Unavailable
            }
        },
        Ok(response)
            if matches!(
                response.status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            warn!(status = response.status.as_u16(), "userinfo rejected token");
            UserInfo::Rejected
        }
        Ok(response) => {
            warn!(status = response.status.as_u16(), "userinfo request failed");
            UserInfo::Unavailable
        }
        Err(e) => {
            warn!("userinfo request failed: {e}");
            UserInfo::Unavailable
        }
    }
}

/// Best-effort user-info lookup: any failure yields `None`.
pub async fn fetch_userinfo(state: &AppState, discovery: &Discovery, token: &str) -> Option<Value> {
    lookup_userinfo(state, discovery, token).await.into_user()
}

pub fn authorization_url(
    oidc: &OidcConfig,
    discovery: &Discovery,
    state: &str,
    pkce: &Pkce,
) -> Result<String, ApiError> {
    let url = url::Url::parse_with_params(
        &discovery.authorization_endpoint,
        [
            ("response_type", "code"),
            ("client_id", oidc.client_id.as_str()),
            ("redirect_uri", oidc.callback_url.as_str()),
            ("scope", oidc.scope.as_str()),
            ("state", state),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
        ],
    )
    .map_err(|e| ApiError::Internal(format!("Invalid authorization endpoint: {e}")))?;
    Ok(url.into())
}

pub async fn authorize(
    State(state): State<AppState>,
) -> Result<Json<Envelope<AuthorizeResponse>>, ApiError> {
    let oidc = oidc_config(&state)?;
    let discovery = discover(&state, oidc).await?;
    let pkce = Pkce::generate();
    let login_state = uuid::Uuid::new_v4().simple().to_string();
    let url = authorization_url(oidc, &discovery, &login_state, &pkce)?;

    Ok(Json(Envelope::ok(AuthorizeResponse {
        url,
        state: login_state,
        code_verifier: pkce.verifier,
        code_challenge: pkce.challenge,
        storage_keys: StorageKeys {
            verifier: VERIFIER_STORAGE_KEY,
            state: STATE_STORAGE_KEY,
        },
    })))
}

pub async fn exchange_token(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Envelope<TokenSet>>, ApiError> {
    let oidc = oidc_config(&state)?;
    let req: TokenRequest = if body.is_empty() {
        TokenRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let code = req
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;
    let verifier = req
        .code_verifier
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing PKCE code verifier".to_string()))?;

    let discovery = discover(&state, oidc).await?;

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", oidc.callback_url.as_str()),
        ("client_id", oidc.client_id.as_str()),
        ("client_secret", oidc.client_secret.as_str()),
        ("code_verifier", verifier),
    ];
    let request = state
        .upstream
        .request_url(
            Service::Login,
            Method::POST,
            &discovery.token_endpoint,
            HeaderMap::new(),
        )
        .form(&form);
    let response = state.upstream.send(Service::Login, request).await?;
    if !response.is_success() {
        warn!(
            status = response.status.as_u16(),
            "token endpoint rejected authorization code"
        );
        return Err(response.into_error("Token endpoint", "exchange authorization code"));
    }
    let tokens: TokenEndpointResponse = response.json()?;

    let user = fetch_userinfo(&state, &discovery, &tokens.access_token).await;
    let expires_at = tokens.expires_in.and_then(expiry_from_now);
    info!(has_user = user.is_some(), "completed OIDC code exchange");

    Ok(Json(Envelope::ok(TokenSet {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
        expires_at,
        id_token: tokens.id_token,
        user,
        redirect_url: oidc.redirect_url.clone(),
    })))
}
