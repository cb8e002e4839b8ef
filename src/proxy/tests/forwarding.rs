use std::sync::Arc;

use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::{spawn_proxy, spawn_router, wait_for_completed_record};
use crate::modules::persistence::request_db::{RequestStore, Scope};

#[tokio::test]
async fn buffered_json_exchange_is_relayed_and_recorded() {
    let store = Arc::new(RequestStore::open_in_memory().unwrap());
    let upstream_app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"ok":true}"#,
            )
        }),
    );
    let upstream = spawn_router(upstream_app).await;
    let proxy = spawn_proxy(&upstream, Arc::clone(&store)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", proxy))
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-caller")
        .body(r#"{"model":"x","messages":[]}"#)
        .send()
        .await
        .expect("proxied request");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let body = response.text().await.unwrap();
    assert_eq!(body, r#"{"ok":true}"#);

    let record = wait_for_completed_record(&store).await;
    assert_eq!(record.method, "POST");
    assert!(record.url.ends_with("/v1/chat/completions"));
    assert_eq!(record.response_status, Some(200));
    assert_eq!(record.response_body.as_deref(), Some("{\n  \"ok\": true\n}"));
    assert!(record.error.is_none());
    assert!(record.duration_ms.is_some());
    // Request body is logged pretty-printed.
    assert!(record.body.as_deref().unwrap().contains("\"model\": \"x\""));
    // The caller's bearer token scopes the record.
    assert_eq!(
        store
            .count(&Scope::Credential("sk-caller".to_string()))
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn default_bearer_is_injected_when_caller_sends_none() {
    let store = Arc::new(RequestStore::open_in_memory().unwrap());
    let upstream_app = Router::new().route(
        "/v1/models",
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            Json(json!({"auth": auth}))
        }),
    );
    let upstream = spawn_router(upstream_app).await;
    let proxy = spawn_proxy(&upstream, Arc::clone(&store)).await;

    let response = reqwest::Client::new()
        .get(format!("{}/v1/models", proxy))
        .send()
        .await
        .expect("proxied request");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["auth"], "Bearer sk-default");

    // The logged headers are the caller's originals, so no bearer is
    // derived for scoping.
    let record = wait_for_completed_record(&store).await;
    assert!(!record.headers.contains_key("authorization"));
    assert_eq!(
        store
            .count(&Scope::Credential("sk-default".to_string()))
            .unwrap(),
        0
    );
    assert_eq!(store.count(&Scope::Unrestricted).unwrap(), 1);
}

#[tokio::test]
async fn query_string_is_passed_through_to_upstream() {
    let store = Arc::new(RequestStore::open_in_memory().unwrap());
    let upstream_app = Router::new().route(
        "/v1/models",
        get(
            |axum::extract::RawQuery(query): axum::extract::RawQuery| async move {
                Json(json!({"query": query.unwrap_or_default()}))
            },
        ),
    );
    let upstream = spawn_router(upstream_app).await;
    let proxy = spawn_proxy(&upstream, Arc::clone(&store)).await;

    let response = reqwest::Client::new()
        .get(format!("{}/v1/models?limit=5&cursor=abc", proxy))
        .send()
        .await
        .expect("proxied request");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["query"], "limit=5&cursor=abc");

    let record = wait_for_completed_record(&store).await;
    assert!(record.url.ends_with("/v1/models?limit=5&cursor=abc"));
}

#[tokio::test]
async fn upstream_connection_refused_synthesizes_a_500() {
    let store = Arc::new(RequestStore::open_in_memory().unwrap());

    // Bind and immediately drop a listener so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let proxy = spawn_proxy(&dead_base, Arc::clone(&store)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", proxy))
        .header("content-type", "application/json")
        .body(r#"{"model":"x"}"#)
        .send()
        .await
        .expect("proxied request");

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().len() > 0);

    let record = wait_for_completed_record(&store).await;
    assert_eq!(record.response_status, Some(500));
    assert!(record.error.is_some());
    assert!(record.response_body.is_none());
    assert!(record.response_headers.as_ref().unwrap().is_empty());
}

#[tokio::test]
async fn non_json_bodies_are_logged_as_plain_text() {
    let store = Arc::new(RequestStore::open_in_memory().unwrap());
    let upstream_app = Router::new().route("/echo", post(|body: String| async move { body }));
    let upstream = spawn_router(upstream_app).await;
    let proxy = spawn_proxy(&upstream, Arc::clone(&store)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/echo", proxy))
        .header("content-type", "text/plain")
        .body("hello upstream")
        .send()
        .await
        .expect("proxied request");
    // text/plain responses go down the streaming path by design; the bytes
    // still arrive intact.
    assert_eq!(response.text().await.unwrap(), "hello upstream");

    let record = wait_for_completed_record(&store).await;
    assert_eq!(record.body.as_deref(), Some("hello upstream"));
    assert_eq!(record.response_body.as_deref(), Some("hello upstream"));
}
