// Shared harness: a fake upstream bound to 127.0.0.1 that records every call,
// plus helpers to drive the gateway router in-process.
#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use http_body_util::BodyExt;
use portal_gateway::config::GatewayConfig;
use portal_gateway::{build_router, AppState};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    pub fn form(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn query_pairs(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.query.as_deref().unwrap_or("").as_bytes())
            .into_owned()
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Stub {
    method: Method,
    path: String,
    status: StatusCode,
    content_type: &'static str,
    body: String,
}

#[derive(Default)]
struct Shared {
    stubs: Vec<Stub>,
    calls: Vec<Recorded>,
}

#[derive(Clone)]
pub struct FakeUpstream {
    pub addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
}

async fn record(
    State(shared): State<Arc<Mutex<Shared>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut shared = shared.lock().unwrap();
    shared.calls.push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    match shared
        .stubs
        .iter()
        .rev()
        .find(|s| s.method == method && s.path == uri.path())
    {
        Some(stub) => (
            stub.status,
            [(header::CONTENT_TYPE, stub.content_type)],
            stub.body.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no stub").into_response(),
    }
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let app = Router::new().fallback(record).with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, shared }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stub(&self, method: Method, path: &str, status: u16, content_type: &'static str, body: &str) {
        self.shared.lock().unwrap().stubs.push(Stub {
            method,
            path: path.to_string(),
            status: StatusCode::from_u16(status).unwrap(),
            content_type,
            body: body.to_string(),
        });
    }

    pub fn stub_json(&self, method: Method, path: &str, status: u16, body: Value) {
        self.stub(method, path, status, "application/json", &body.to_string());
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.shared.lock().unwrap().calls.clone()
    }

    /// Discovery document pointing back at this server.
    pub fn stub_discovery(&self) {
        self.stub_json(
            Method::GET,
            "/oidc/.well-known/openid-configuration",
            200,
            serde_json::json!({
                "issuer": self.url("/oidc"),
                "authorization_endpoint": self.url("/oidc/authorize"),
                "token_endpoint": self.url("/oidc/token"),
                "userinfo_endpoint": self.url("/oidc/userinfo"),
            }),
        );
    }
}

pub struct TestApp {
    pub app: Router,
    pub upstream: FakeUpstream,
}

impl TestApp {
    pub async fn canfar() -> Self {
        Self::with_env(&[]).await
    }

    pub async fn oidc() -> Self {
        Self::with_env(&[("AUTH_MODE", "oidc")]).await
    }

    pub async fn with_env(extra: &[(&str, &str)]) -> Self {
        let upstream = FakeUpstream::start().await;
        let mut env: HashMap<String, String> = HashMap::new();
        env.insert("LOGIN_API".into(), upstream.url("/ac"));
        env.insert("SKAHA_API".into(), upstream.url("/skaha/v0"));
        env.insert("STORAGE_API".into(), upstream.url("/arc"));
        env.insert("SKAHA_TIMEOUT_MS".into(), "2000".into());
        env.insert("OIDC_URI".into(), upstream.url("/oidc"));
        env.insert("OIDC_CLIENT_ID".into(), "portal".into());
        env.insert("OIDC_CLIENT_SECRET".into(), "s3cret".into());
        env.insert("OIDC_CALLBACK_URI".into(), "https://portal.example.org/callback".into());
        env.insert("OIDC_REDIRECT_URI".into(), "https://portal.example.org/".into());
        for (k, v) in extra {
            env.insert(k.to_string(), v.to_string());
        }
        let config = GatewayConfig::from_env(&env).unwrap();
        let state = AppState::new(config).unwrap();
        Self {
            app: build_router(state),
            upstream,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body: bytes,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
