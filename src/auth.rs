//! Auth endpoints that work in both modes: logout, current session,
//! permission checks and user lookup.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::AuthMode;
use crate::credentials::{BearerForwarder, SESSION_COOKIES};
use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::oidc::{self, UserInfo};
use crate::state::AppState;
use crate::storage::{validate_node_name, validate_username};
use crate::upstream::Service;
use crate::vospace::NodeProperties;

const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// `Set-Cookie` value that clears `name`.
pub fn expired_cookie(name: &str, secure: bool) -> String {
    let mut cookie =
        format!("{name}=; Path=/; Expires={EPOCH}; Max-Age=0; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Clears both session cookies whether or not they were set.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let secure = state.config.production;
    let cookies = SESSION_COOKIES.map(|name| (header::SET_COOKIE, expired_cookie(name, secure)));
    info!("cleared session cookies");
    (
        AppendHeaders(cookies),
        Json(LogoutResponse {
            success: true,
            message: "Logged out",
        }),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub authenticated: bool,
    pub mode: AuthMode,
    pub user: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Token expiry in unix seconds. Present (possibly `null`) only for an
    /// authenticated OIDC session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<Option<u64>>,
}

impl SessionView {
    fn anonymous(mode: AuthMode) -> Self {
        Self {
            authenticated: false,
            mode,
            user: None,
            access_token: None,
            expires: None,
        }
    }
}

pub async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionView>, ApiError> {
    let view = match state.auth_mode() {
        AuthMode::Canfar => canfar_session(&state, &headers).await?,
        AuthMode::Oidc => oidc_session(&state, &headers).await?,
    };
    Ok(Json(view))
}

async fn canfar_session(state: &AppState, headers: &HeaderMap) -> Result<SessionView, ApiError> {
    let credentials = state.credentials(headers);
    if credentials.is_empty() {
        return Ok(SessionView::anonymous(AuthMode::Canfar));
    }

    let request = state
        .upstream
        .request(Service::Login, Method::GET, "whoami", credentials);
    let response = state.upstream.send(Service::Login, request).await?;
    match response.status {
        status if status.is_success() => Ok(SessionView {
            authenticated: true,
            mode: AuthMode::Canfar,
            user: Some(response.json_or_text()),
            access_token: None,
            expires: None,
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            debug!("login service rejected session cookie");
            Ok(SessionView::anonymous(AuthMode::Canfar))
        }
        _ => Err(response.into_error("Session", "check login session")),
    }
}

async fn oidc_session(state: &AppState, headers: &HeaderMap) -> Result<SessionView, ApiError> {
    let Some(token) = BearerForwarder::token(headers) else {
        return Ok(SessionView::anonymous(AuthMode::Oidc));
    };
    let oidc = oidc::oidc_config(state)?;
    let userinfo = match oidc::discover(state, oidc).await {
        Ok(discovery) => oidc::lookup_userinfo(state, &discovery, &token).await,
        Err(_) => UserInfo::Unavailable,
    };
    if let UserInfo::Rejected = userinfo {
        debug!("identity provider rejected bearer token");
        return Ok(SessionView::anonymous(AuthMode::Oidc));
    }
    Ok(SessionView {
        authenticated: true,
        mode: AuthMode::Oidc,
        user: userinfo.into_user(),
        expires: Some(oidc::token_expiry(&token)),
        access_token: Some(token),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
}

impl FromStr for Permission {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "execute" => Ok(Permission::Execute),
            _ => Err(ApiError::BadRequest(
                "Permission must be one of: read, write, execute".to_string(),
            )),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
        })
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PermissionCheck {
    pub granted: bool,
    pub username: String,
    pub resource: String,
    pub permission: Permission,
}

/// Decide a permission from a node the caller could read. Writing and
/// executing need ownership or a group-write grant.
pub fn grants(props: &NodeProperties, username: &str, permission: Permission) -> bool {
    match permission {
        Permission::Read => true,
        Permission::Write | Permission::Execute => {
            let owner = props.core("creator").is_some_and(|creator| {
                creator == username
                    || creator
                        .split(',')
                        .any(|part| part.trim().eq_ignore_ascii_case(&format!("cn={username}")))
            });
            let group_write = props
                .core("groupwrite")
                .is_some_and(|groups| !groups.trim().is_empty());
            owner || group_write
        }
    }
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

pub async fn check_permission(
    State(state): State<AppState>,
    params: Result<Query<HashMap<String, String>>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<PermissionCheck>, ApiError> {
    let Query(params) = params?;
    let (username, resource, permission) = match (
        param(&params, "username"),
        param(&params, "resource"),
        param(&params, "permission"),
    ) {
        (Some(u), Some(r), Some(p)) => (u, r, p),
        (u, r, p) => {
            let missing: Vec<&str> = [("username", u), ("resource", r), ("permission", p)]
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| *name)
                .collect();
            return Err(ApiError::BadRequest(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )));
        }
    };
    let permission: Permission = permission.parse()?;
    let resource = validate_node_name(resource)
        .map_err(|_| ApiError::BadRequest(format!("Invalid resource: {resource}")))?;

    let request = state
        .upstream
        .request(
            Service::Storage,
            Method::GET,
            &format!("nodes/{resource}"),
            state.credentials(&headers),
        )
        .query(&[("limit", "0")]);
    let response = state.upstream.send(Service::Storage, request).await?;

    let granted = match response.status {
        status if status.is_success() => {
            let props = NodeProperties::parse(&response.body)
                .map_err(|e| ApiError::Upstream(e.to_string()))?;
            grants(&props, username, permission)
        }
        // Denied or absent both mean "no", not an error.
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => false,
        _ => return Err(response.into_error("Resource", "check permission")),
    };

    debug!(%permission, granted, "permission check");
    Ok(Json(PermissionCheck {
        granted,
        username: username.to_string(),
        resource: resource.to_string(),
        permission,
    }))
}

pub async fn lookup_user(
    State(state): State<AppState>,
    username: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(username) = username?;
    let username = validate_username(&username)?;
    let request = state
        .upstream
        .request(
            Service::Login,
            Method::GET,
            &format!("users/{username}"),
            state.credentials(&headers),
        )
        .query(&[("idType", "HTTP"), ("detail", "display")]);
    let response = state.upstream.send(Service::Login, request).await?;
    if !response.is_success() {
        return Err(response.into_error("User", "look up user"));
    }
    Ok(Json(Envelope::ok(response.json_or_text())))
}
