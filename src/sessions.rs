//! Session handlers. Session lifecycle belongs to the workload service; these
//! only validate, forward and reshape.

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use crate::envelope::{Envelope, ListEnvelope};
use crate::error::ApiError;
use crate::platform_load::{self, PlatformLoad, PlatformStats};
use crate::state::AppState;
use crate::upstream::Service;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Pending,
    Failed,
    Terminating,
    Error,
    Unknown,
    /// Any status this gateway does not name, relayed verbatim.
    #[serde(untagged)]
    Other(String),
}

/// A session as reported by the workload service. Fields this gateway does
/// not interpret are relayed untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub session_type: String,
    #[serde(default = "unknown_status")]
    pub status: SessionStatus,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn unknown_status() -> SessionStatus {
    SessionStatus::Unknown
}

/// Numbers arrive from the launch form either as JSON numbers or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Number(u64),
    Text(String),
}

impl FormValue {
    fn render(&self) -> String {
        match self {
            FormValue::Number(n) => n.to_string(),
            FormValue::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub session_type: Option<String>,
    pub session_name: Option<String>,
    pub container_image: Option<String>,
    pub cores: Option<FormValue>,
    pub ram: Option<FormValue>,
    pub gpus: Option<FormValue>,
    /// Headless jobs only.
    pub cmd: Option<String>,
    pub args: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct SessionEvents {
    pub id: String,
    pub events: String,
}

#[derive(Debug, Serialize)]
pub struct RenewedSession {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ImagesQuery {
    #[serde(rename = "type")]
    pub image_type: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl CreateSessionRequest {
    /// The form body the workload service expects, in its field order.
    pub fn to_form(&self) -> Result<Vec<(&'static str, String)>, ApiError> {
        let session_type = non_blank(&self.session_type);
        let name = non_blank(&self.session_name);
        let image = non_blank(&self.container_image);
        let (Some(session_type), Some(name), Some(image)) = (session_type, name, image) else {
            let missing: Vec<&str> = [
                ("sessionType", session_type),
                ("sessionName", name),
                ("containerImage", image),
            ]
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(field, _)| *field)
            .collect();
            return Err(ApiError::BadRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        };

        let mut form = vec![
            ("name", name.to_string()),
            ("image", image.to_string()),
            ("type", session_type.to_string()),
        ];
        for (key, value) in [("cores", &self.cores), ("ram", &self.ram), ("gpus", &self.gpus)] {
            if let Some(value) = value {
                let rendered = value.render();
                if !rendered.chars().all(|c| c.is_ascii_digit()) || rendered.is_empty() {
                    return Err(ApiError::BadRequest(format!(
                        "{key} must be a non-negative integer"
                    )));
                }
                form.push((key, rendered));
            }
        }
        if let Some(cmd) = non_blank(&self.cmd) {
            form.push(("cmd", cmd.to_string()));
        }
        if let Some(args) = non_blank(&self.args) {
            form.push(("args", args.to_string()));
        }
        for (key, value) in &self.env {
            form.push(("env", format!("{key}={value}")));
        }
        Ok(form)
    }
}

/// Session ids come from upstream; reject anything that could escape the
/// path segment.
pub fn validate_session_id(id: &str) -> Result<&str, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("Session ID is required".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || id.contains("..")
    {
        return Err(ApiError::BadRequest(format!("Invalid session ID: {id}")));
    }
    Ok(id)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListEnvelope<Session>>, ApiError> {
    let request = state.upstream.request(
        Service::Skaha,
        Method::GET,
        "session",
        state.credentials(&headers),
    );
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Sessions", "list sessions"));
    }
    let sessions: Vec<Session> = response.json()?;
    info!(count = sessions.len(), "listed sessions");
    Ok(Json(ListEnvelope::ok(sessions)))
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateSessionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;
    let form = req.to_form()?;

    let request = state
        .upstream
        .request(
            Service::Skaha,
            Method::POST,
            "session",
            state.credentials(&headers),
        )
        .form(&form);
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Session", "create session"));
    }

    let id = response
        .body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ApiError::Upstream("Workload service returned no session ID".to_string()))?
        .to_string();

    // to_form has already rejected blanks, so these are present.
    let created = CreatedSession {
        id,
        name: non_blank(&req.session_name).unwrap_or_default().to_string(),
        session_type: non_blank(&req.session_type).unwrap_or_default().to_string(),
        image: non_blank(&req.container_image).unwrap_or_default().to_string(),
    };
    info!(session_id = %created.id, session_type = %created.session_type, "launched session");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_session(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Session>>, ApiError> {
    let Path(id) = id?;
    let id = validate_session_id(&id)?;
    let request = state.upstream.request(
        Service::Skaha,
        Method::GET,
        &format!("session/{id}"),
        state.credentials(&headers),
    );
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Session", "get session"));
    }

    // Some deployments answer with a one-element array.
    let session = match response.json::<Value>()? {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?,
        other => other,
    };
    let session: Session = serde_json::from_value(session)
        .map_err(|e| ApiError::Upstream(format!("Invalid response from upstream: {e}")))?;
    Ok(Json(Envelope::ok(session)))
}

pub async fn delete_session(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    let id = validate_session_id(&id)?;
    let request = state.upstream.request(
        Service::Skaha,
        Method::DELETE,
        &format!("session/{id}"),
        state.credentials(&headers),
    );
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Session", "delete session"));
    }
    info!(session_id = %id, "deleted session");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn renew_session(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<Envelope<RenewedSession>>, ApiError> {
    let Path(id) = id?;
    let id = validate_session_id(&id)?;
    let request = state
        .upstream
        .request(
            Service::Skaha,
            Method::POST,
            &format!("session/{id}"),
            state.credentials(&headers),
        )
        .query(&[("action", "renew")]);
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Session", "renew session"));
    }

    let message = match response.body.trim() {
        "" => "Session renewed".to_string(),
        text => text.to_string(),
    };
    info!(session_id = %id, "renewed session");
    Ok(Json(Envelope::ok(RenewedSession {
        id: id.to_string(),
        message,
    })))
}

pub async fn session_events(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<Envelope<SessionEvents>>, ApiError> {
    let Path(id) = id?;
    let id = validate_session_id(&id)?;
    let request = state
        .upstream
        .request(
            Service::Skaha,
            Method::GET,
            &format!("session/{id}"),
            state.credentials(&headers),
        )
        .query(&[("view", "events")]);
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Session", "get session events"));
    }
    Ok(Json(Envelope::ok(SessionEvents {
        id: id.to_string(),
        events: response.body,
    })))
}

async fn relay_json(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    query: &[(&str, &str)],
    resource: &str,
    action: &str,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let request = state
        .upstream
        .request(Service::Skaha, Method::GET, path, state.credentials(headers))
        .query(query);
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error(resource, action));
    }
    Ok(Json(Envelope::ok(response.json()?)))
}

pub async fn session_context(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Value>>, ApiError> {
    relay_json(&state, &headers, "context", &[], "Context", "get session context").await
}

pub async fn session_images(
    State(state): State<AppState>,
    query: Result<Query<ImagesQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Query(query) = query?;
    let image_type = non_blank(&query.image_type);
    let params: Vec<(&str, &str)> = image_type.map(|t| ("type", t)).into_iter().collect();
    relay_json(&state, &headers, "image", &params, "Images", "list images").await
}

pub async fn image_repositories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Value>>, ApiError> {
    relay_json(
        &state,
        &headers,
        "repository",
        &[],
        "Repositories",
        "list image repositories",
    )
    .await
}

pub async fn get_platform_load(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<PlatformLoad>>, ApiError> {
    let request = state
        .upstream
        .request(
            Service::Skaha,
            Method::GET,
            "session",
            state.credentials(&headers),
        )
        .query(&[("view", "stats")]);
    let response = state.upstream.send(Service::Skaha, request).await?;
    if !response.is_success() {
        return Err(response.into_error("Platform statistics", "get platform load"));
    }
    let stats: PlatformStats = response.json()?;
    let load = platform_load::transform(&stats, state.config.max_instances)?;
    Ok(Json(Envelope::ok(load)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> CreateSessionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn form_keeps_upstream_field_order() {
        let form = request(json!({
            "sessionType": "notebook",
            "sessionName": "nb1",
            "containerImage": "astroml:latest"
        }))
        .to_form()
        .unwrap();
        assert_eq!(
            form,
            vec![
                ("name", "nb1".to_string()),
                ("image", "astroml:latest".to_string()),
                ("type", "notebook".to_string()),
            ]
        );
    }

    #[test]
    fn form_includes_resources_and_headless_fields() {
        let form = request(json!({
            "sessionType": "headless",
            "sessionName": "job",
            "containerImage": "images.example.org/skaha/terminal:1.1",
            "cores": 4,
            "ram": "16",
            "cmd": "python",
            "args": "run.py --fast",
            "env": {"A": "1"}
        }))
        .to_form()
        .unwrap();
        assert!(form.contains(&("cores", "4".to_string())));
        assert!(form.contains(&("ram", "16".to_string())));
        assert!(form.contains(&("cmd", "python".to_string())));
        assert!(form.contains(&("args", "run.py --fast".to_string())));
        assert!(form.contains(&("env", "A=1".to_string())));
    }

    #[test]
    fn missing_fields_are_named() {
        let err = request(json!({"sessionName": "  "})).to_form().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "Missing required fields: sessionType, sessionName, containerImage"
        );
    }

    #[test]
    fn non_numeric_resources_are_rejected() {
        let err = request(json!({
            "sessionType": "notebook",
            "sessionName": "nb1",
            "containerImage": "img",
            "ram": "lots"
        }))
        .to_form()
        .unwrap_err();
        assert_eq!(err.to_string(), "ram must be a non-negative integer");
    }

    #[test]
    fn session_ids_are_validated() {
        assert_eq!(validate_session_id(" abc-123 ").unwrap(), "abc-123");
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("a/b").is_err());
    }

    #[test]
    fn unrecognised_status_is_kept_verbatim() {
        let session: Session = serde_json::from_value(json!({
            "id": "s1",
            "status": "Completed",
            "connectURL": "https://example.org/s1"
        }))
        .unwrap();
        assert_eq!(session.status, SessionStatus::Other("Completed".to_string()));
        assert_eq!(serde_json::to_value(&session).unwrap()["status"], "Completed");
        assert_eq!(session.extra["connectURL"], "https://example.org/s1");
    }

    #[test]
    fn known_and_missing_statuses() {
        let running: Session =
            serde_json::from_value(json!({"id": "s1", "status": "Running"})).unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        let bare: Session = serde_json::from_value(json!({"id": "s2"})).unwrap();
        assert_eq!(bare.status, SessionStatus::Unknown);
    }
}
