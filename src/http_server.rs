//! HTTP server implementation using Axum.

use crate::auth;
use crate::error::ApiError;
use crate::health;
use crate::oidc;
use crate::sessions;
use crate::state::AppState;
use crate::storage;
use axum::{
    http::{Method, Uri},
    routing::{get, post, MethodRouter},
    Router,
};
use std::future::Ready;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Fallback for a route's unsupported methods: 405 with the allowed list.
fn reject(
    allowed: &'static [&'static str],
) -> impl FnOnce(Method) -> Ready<ApiError> + Clone + Send + Sync + 'static {
    move |method| std::future::ready(ApiError::MethodNotAllowed { method, allowed })
}

fn only(route: MethodRouter<AppState>, allowed: &'static [&'static str]) -> MethodRouter<AppState> {
    route.fallback(reject(allowed))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Process
        .route("/api/health", only(get(health::health), &["GET"]))
        .route("/api/health/ready", only(get(health::ready), &["GET"]))
        .route("/api/metrics", only(get(health::metrics), &["GET"]))
        // Sessions
        .route(
            "/api/sessions",
            only(
                get(sessions::list_sessions).post(sessions::create_session),
                &["GET", "POST"],
            ),
        )
        .route(
            "/api/sessions/context",
            only(get(sessions::session_context), &["GET"]),
        )
        .route(
            "/api/sessions/images",
            only(get(sessions::session_images), &["GET"]),
        )
        .route(
            "/api/sessions/repository",
            only(get(sessions::image_repositories), &["GET"]),
        )
        .route(
            "/api/sessions/platform-load",
            only(get(sessions::get_platform_load), &["GET"]),
        )
        .route(
            "/api/sessions/:id",
            only(
                get(sessions::get_session).delete(sessions::delete_session),
                &["GET", "DELETE"],
            ),
        )
        .route(
            "/api/sessions/:id/renew",
            only(post(sessions::renew_session), &["POST"]),
        )
        .route(
            "/api/sessions/:id/events",
            only(get(sessions::session_events), &["GET"]),
        )
        // Storage
        .route(
            "/api/storage/quota/:username",
            only(get(storage::storage_quota), &["GET"]),
        )
        .route(
            "/api/storage/raw/:username",
            only(get(storage::storage_raw), &["GET"]),
        )
        // Auth
        .route("/api/auth/logout", only(post(auth::logout), &["POST"]))
        .route(
            "/api/auth/session",
            only(get(auth::current_session), &["GET"]),
        )
        .route(
            "/api/auth/permissions",
            only(get(auth::check_permission), &["GET"]),
        )
        .route(
            "/api/auth/user/:username",
            only(get(auth::lookup_user), &["GET"]),
        )
        .route(
            "/api/auth/oidc/authorize",
            only(get(oidc::authorize), &["GET"]),
        )
        .route(
            "/api/auth/oidc/token",
            only(post(oidc::exchange_token), &["POST"]),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port until ctrl-c.
pub async fn run_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
