//! Storage handlers backed by the VOSpace service.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream::Service;
use crate::vospace::NodeProperties;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    pub username: String,
    pub quota: Option<u64>,
    pub used: Option<u64>,
    pub free: Option<i128>,
    pub used_percent: Option<f64>,
}

impl StorageQuota {
    pub fn from_properties(username: &str, props: &NodeProperties) -> Self {
        let quota = props.core_u64("quota");
        let used = props.core_u64("length");
        let (free, used_percent) = match (quota, used) {
            (Some(quota), Some(used)) => {
                let percent = if quota == 0 {
                    None
                } else {
                    Some(((used as f64 / quota as f64) * 10_000.0).round() / 100.0)
                };
                (Some(i128::from(quota) - i128::from(used)), percent)
            }
            _ => (None, None),
        };
        Self {
            username: username.to_string(),
            quota,
            used,
            free,
            used_percent,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    pub name: Option<String>,
}

pub fn validate_username(username: &str) -> Result<&str, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        || username.contains("..")
    {
        return Err(ApiError::BadRequest(format!("Invalid username: {username}")));
    }
    Ok(username)
}

/// A relative node path. Empty and dot segments are refused, as are escape
/// and URL delimiter characters, so the path cannot be re-decoded into a
/// traversal or a query further down the line.
pub fn validate_node_name(name: &str) -> Result<&str, ApiError> {
    let name = name.trim().trim_matches('/');
    if name.is_empty()
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        || name
            .chars()
            .any(|c| c.is_control() || matches!(c, '%' | '?' | '#' | '\\'))
    {
        return Err(ApiError::BadRequest(format!("Invalid node name: {name}")));
    }
    Ok(name)
}

pub async fn storage_quota(
    State(state): State<AppState>,
    username: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<Envelope<StorageQuota>>, ApiError> {
    let Path(username) = username?;
    let username = validate_username(&username)?;
    let request = state
        .upstream
        .request(
            Service::Storage,
            Method::GET,
            &format!("nodes/home/{username}"),
            state.credentials(&headers),
        )
        .query(&[("limit", "0")]);
    let response = state.upstream.send(Service::Storage, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Storage", "get storage quota"));
    }

    let props = NodeProperties::parse(&response.body)
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    Ok(Json(Envelope::ok(StorageQuota::from_properties(
        username, &props,
    ))))
}

pub async fn storage_raw(
    State(state): State<AppState>,
    username: Result<Path<String>, PathRejection>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (Path(username), Query(query)) = (username?, query?);
    let username = validate_username(&username)?;
    let path = match query.name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => format!("nodes/home/{username}/{}", validate_node_name(name)?),
        None => format!("nodes/home/{username}"),
    };

    let request = state
        .upstream
        .request(
            Service::Storage,
            Method::GET,
            &path,
            state.credentials(&headers),
        )
        .query(&[("limit", "0")]);
    let response = state.upstream.send(Service::Storage, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Storage node", "get storage node"));
    }

    let content_type = response
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/xml"));
    Ok((
        response.status,
        [(header::CONTENT_TYPE, content_type)],
        response.body,
    )
        .into_response())
}
