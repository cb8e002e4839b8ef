use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::modules::persistence::request_db::{CompletedExchange, NewRequest, RequestStore};
use crate::proxy::state::ProxyState;
use crate::proxy::streaming;

/// One request lifecycle: capture, sanitize, open the log record, dispatch
/// upstream, classify, relay (buffered or streaming), close the record.
pub async fn forward_request(State(state): State<ProxyState>, req: Request) -> Response {
    let started = Instant::now();

    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let (parts, body) = req.into_parts();
    let inbound_headers = parts.headers;

    let (body_bytes, logged_body, request_json) =
        read_inbound_body(&inbound_headers, body).await;

    let target_url = state.upstream.target_url(&path_and_query);
    let forward_headers =
        sanitize_forward_headers(&inbound_headers, &state.config.default_api_key);

    // Open the record before dispatch so in-flight requests are visible to
    // readers. The logged headers are the caller's originals.
    let record_id = match state
        .store
        .insert_async(NewRequest {
            method: method.to_string(),
            url: target_url.clone(),
            headers: header_map_to_btree(&inbound_headers),
            body: logged_body,
        })
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Failed to persist request record: {}", e);
            // Forwarding still proceeds; completion will be a silent no-op.
            Uuid::new_v4().to_string()
        }
    };

    tracing::info!("Proxying {} {} [ID: {}]", method, target_url, record_id);

    let mut upstream_req = state
        .upstream
        .client()
        .request(method.clone(), &target_url)
        .headers(forward_headers);
    if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
        upstream_req = upstream_req.body(body_bytes);
    }

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            return dispatch_failure(&state.store, &record_id, started, e.to_string()).await;
        }
    };

    let status = upstream_resp.status();
    let response_headers = upstream_resp.headers().clone();

    if streaming::is_streaming_response(&response_headers, request_json.as_ref()) {
        relay_streaming(
            Arc::clone(&state.store),
            record_id,
            started,
            status,
            response_headers,
            upstream_resp,
        )
    } else {
        relay_buffered(
            &state.store,
            &record_id,
            started,
            status,
            response_headers,
            upstream_resp,
        )
        .await
    }
}

/// Reads the inbound body and renders its logged text form. JSON bodies are
/// pretty-printed for the log; parse failures fall back to lossy text and
/// never block forwarding. The raw bytes are what gets forwarded upstream.
async fn read_inbound_body(
    headers: &HeaderMap,
    body: Body,
) -> (Bytes, Option<String>, Option<Value>) {
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                Bytes::new(),
                Some(format!("Error reading body: {}", e)),
                None,
            );
        }
    };
    if bytes.is_empty() {
        return (bytes, None, None);
    }

    if content_type(headers).starts_with("application/json") {
        if let Ok(parsed) = serde_json::from_slice::<Value>(&bytes) {
            let pretty = serde_json::to_string_pretty(&parsed)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return (bytes, Some(pretty), Some(parsed));
        }
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    (bytes, Some(text), None)
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Forwarding copy of the inbound headers: `Host` and `Content-Length` are
/// dropped (the transport recomputes them) and the default bearer credential
/// is injected when the caller sent no Authorization header.
fn sanitize_forward_headers(inbound: &HeaderMap, default_api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        match name.as_str() {
            "host" | "content-length" => {}
            _ => {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    if !headers.contains_key(header::AUTHORIZATION) {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", default_api_key)) {
            headers.insert(header::AUTHORIZATION, value);
        }
    }

    headers
}

fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        let text = value
            .to_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| String::from_utf8_lossy(value.as_bytes()).into_owned());
        map.insert(name.to_string(), text);
    }
    map
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

async fn complete_record(store: &Arc<RequestStore>, id: &str, outcome: CompletedExchange) {
    // Logging failures never surface to the caller.
    if let Err(e) = store.complete_async(id, outcome).await {
        tracing::error!("Failed to persist response for record {}: {}", id, e);
    }
}

/// Dispatch never produced a response: close the record as a local failure
/// and synthesize a 500 for the caller.
async fn dispatch_failure(
    store: &Arc<RequestStore>,
    record_id: &str,
    started: Instant,
    error_text: String,
) -> Response {
    tracing::error!("Proxy error for {}: {}", record_id, error_text);
    complete_record(
        store,
        record_id,
        CompletedExchange {
            status: 500,
            headers: BTreeMap::new(),
            body: None,
            duration_ms: elapsed_ms(started),
            error: Some(error_text.clone()),
        },
    )
    .await;

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": error_text})),
    )
        .into_response()
}

async fn relay_buffered(
    store: &Arc<RequestStore>,
    record_id: &str,
    started: Instant,
    status: StatusCode,
    response_headers: HeaderMap,
    upstream_resp: reqwest::Response,
) -> Response {
    let ct = content_type(&response_headers);
    let body_bytes = match upstream_resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            // Body transfer failed inside the deadline window; same local
            // failure handling as a dispatch error.
            return dispatch_failure(store, record_id, started, e.to_string()).await;
        }
    };

    let duration_ms = elapsed_ms(started);
    let formatted = format_response_body(&ct, &body_bytes);
    complete_record(
        store,
        record_id,
        CompletedExchange {
            status: status.as_u16(),
            headers: header_map_to_btree(&response_headers),
            body: Some(formatted),
            duration_ms,
            error: None,
        },
    )
    .await;

    tracing::info!(
        "Response {} for {} ({:.2}ms)",
        status.as_u16(),
        record_id,
        duration_ms
    );

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        *headers = streaming::relay_headers(&response_headers);
    }
    builder
        .body(Body::from(body_bytes))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response").into_response()
        })
}

fn format_response_body(content_type: &str, bytes: &[u8]) -> String {
    if content_type.starts_with("application/json") {
        if let Ok(parsed) = serde_json::from_slice::<Value>(bytes) {
            if let Ok(pretty) = serde_json::to_string_pretty(&parsed) {
                return pretty;
            }
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Relays chunks to the caller as they arrive while accumulating them for
/// the log. Dropping the caller's connection drops this stream, which drops
/// the upstream body in turn and leaves the record incomplete on purpose.
fn relay_streaming(
    store: Arc<RequestStore>,
    record_id: String,
    started: Instant,
    status: StatusCode,
    response_headers: HeaderMap,
    upstream_resp: reqwest::Response,
) -> Response {
    tracing::info!("Handling streaming response for {}", record_id);

    let relay_headers = streaming::streaming_relay_headers(&response_headers);
    let logged_headers = header_map_to_btree(&response_headers);

    let stream = async_stream::stream! {
        let mut collected: Vec<u8> = Vec::new();
        let mut chunks = upstream_resp.bytes_stream();
        loop {
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    collected.extend_from_slice(&chunk);
                    yield Ok::<Bytes, std::io::Error>(chunk);
                }
                Some(Err(e)) => {
                    let error_text = e.to_string();
                    let duration_ms = elapsed_ms(started);
                    tracing::error!(
                        "Error in streaming response for {}: {}",
                        record_id,
                        error_text
                    );
                    complete_record(
                        &store,
                        &record_id,
                        CompletedExchange {
                            status: status.as_u16(),
                            headers: logged_headers.clone(),
                            body: None,
                            duration_ms,
                            error: Some(error_text.clone()),
                        },
                    )
                    .await;
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, error_text));
                    return;
                }
                None => {
                    let duration_ms = elapsed_ms(started);
                    let body_text = String::from_utf8_lossy(&collected).into_owned();
                    complete_record(
                        &store,
                        &record_id,
                        CompletedExchange {
                            status: status.as_u16(),
                            headers: logged_headers.clone(),
                            body: Some(body_text),
                            duration_ms,
                            error: None,
                        },
                    )
                    .await;
                    tracing::info!(
                        "Streaming response completed for {} ({:.2}ms)",
                        record_id,
                        duration_ms
                    );
                    return;
                }
            }
        }
    };

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        *headers = relay_headers;
    }
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response").into_response()
        })
}
