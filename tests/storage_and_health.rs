// Storage relays and process endpoints.
mod common;

use axum::http::{header, Method, StatusCode};
use common::TestApp;
use serde_json::json;

const HOME_NODE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<vos:node xmlns:vos="http://www.ivoa.net/xml/VOSpace/v2.0" uri="vos://cadc.nrc.ca~arc/home/alice">
  <vos:properties>
    <vos:property uri="ivo://ivoa.net/vospace/core#quota">1000</vos:property>
    <vos:property uri="ivo://ivoa.net/vospace/core#length">250</vos:property>
  </vos:properties>
</vos:node>"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_is_parsed_from_node_properties() {
    let app = TestApp::canfar().await;
    app.upstream
        .stub(Method::GET, "/arc/nodes/home/alice", 200, "text/xml", HOME_NODE);

    let response = app
        .send(
            Method::GET,
            "/api/storage/quota/alice",
            &[("cookie", "CADC_SSO=t")],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json()["data"],
        json!({"username": "alice", "quota": 1000, "used": 250, "free": 750, "usedPercent": 25.0})
    );
    assert_eq!(app.upstream.calls()[0].query_pairs()["limit"], "0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_requires_authentication_upstream() {
    let app = TestApp::canfar().await;
    app.upstream
        .stub(Method::GET, "/arc/nodes/home/alice", 401, "text/plain", "login");

    let response = app
        .send(Method::GET, "/api/storage/quota/alice", &[], None)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["message"], "Authentication required");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_node_is_relayed_verbatim() {
    let app = TestApp::canfar().await;
    app.upstream.stub(
        Method::GET,
        "/arc/nodes/home/alice/notebooks",
        200,
        "text/xml",
        HOME_NODE,
    );

    let response = app
        .send(
            Method::GET,
            "/api/storage/raw/alice?name=notebooks",
            &[],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers[header::CONTENT_TYPE], "text/xml");
    assert_eq!(response.text(), HOME_NODE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_node_rejects_traversal() {
    let app = TestApp::canfar().await;
    let response = app
        .send(Method::GET, "/api/storage/raw/alice?name=../bob", &[], None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(app.upstream.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_node_rejects_encoded_traversal_and_query_injection() {
    let app = TestApp::canfar().await;
    for uri in [
        "/api/storage/raw/alice?name=%252E%252E/bob",
        "/api/storage/raw/alice?name=x%3Flimit%3D99",
        "/api/storage/raw/alice?name=x%23frag",
    ] {
        let response = app.send(Method::GET, uri, &[], None).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(response.json()["success"], false);
    }
    assert!(app.upstream.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oidc_mode_forwards_bearer_to_storage() {
    let app = TestApp::oidc().await;
    app.upstream
        .stub(Method::GET, "/arc/nodes/home/alice", 200, "text/xml", HOME_NODE);

    app.send(
        Method::GET,
        "/api/storage/quota/alice",
        &[("authorization", "Bearer at-9"), ("cookie", "CADC_SSO=ignored")],
        None,
    )
    .await;
    let call = &app.upstream.calls()[0];
    assert_eq!(call.headers[header::AUTHORIZATION], "Bearer at-9");
    assert!(call.headers.get(header::COOKIE).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_and_readiness() {
    let app = TestApp::oidc().await;

    let health = app.send(Method::GET, "/api/health", &[], None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.json()["status"], "ok");

    let ready = app.send(Method::GET, "/api/health/ready", &[], None).await;
    assert_eq!(ready.json(), json!({"status": "ready", "authMode": "oidc"}));

    let wrong = app.send(Method::POST, "/api/health", &[], None).await;
    assert_eq!(wrong.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(wrong.headers[header::ALLOW], "GET");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_are_prometheus_text() {
    let app = TestApp::canfar().await;
    let response = app.send(Method::GET, "/api/metrics", &[], None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let text = response.text();
    assert!(text.contains("# TYPE process_uptime_seconds gauge"));
    assert!(text.contains("gateway_auth_mode_info{mode=\"canfar\"} 1"));
}
