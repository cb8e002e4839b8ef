use axum::http::{header, HeaderMap, HeaderValue};
use serde_json::Value;

/// Decides whether an upstream response must be relayed incrementally.
///
/// This is a heuristic, not a protocol guarantee: a miss in either direction
/// still delivers the full body, just through the other code path.
pub fn is_streaming_response(response_headers: &HeaderMap, request_json: Option<&Value>) -> bool {
    let content_type = header_value(response_headers, header::CONTENT_TYPE).to_ascii_lowercase();
    if content_type.starts_with("text/event-stream") {
        return true;
    }
    // The upstream sometimes labels streamed text as text/plain.
    if content_type.starts_with("text/plain") {
        return true;
    }
    if header_value(response_headers, header::TRANSFER_ENCODING).eq_ignore_ascii_case("chunked") {
        return true;
    }

    // Headers inconclusive: fall back to the request's own stream flag.
    request_json
        .and_then(|body| body.get("stream"))
        .map(json_truthy)
        .unwrap_or(false)
}

pub fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Upstream headers minus the fields the transport layer recomputes.
pub fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        match name.as_str() {
            "content-length" | "transfer-encoding" | "connection" => {}
            _ => {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    headers
}

/// Headers for the streaming relay: upstream's own plus the permissive
/// cross-origin and no-cache/keep-alive set.
pub fn streaming_relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = relay_headers(upstream);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn event_stream_content_type_is_streaming() {
        let h = headers(&[("content-type", "text/event-stream; charset=utf-8")]);
        assert!(is_streaming_response(&h, None));
    }

    #[test]
    fn text_plain_is_streaming() {
        let h = headers(&[("content-type", "text/plain")]);
        assert!(is_streaming_response(&h, None));
    }

    #[test]
    fn chunked_transfer_encoding_is_streaming() {
        let h = headers(&[
            ("content-type", "application/json"),
            ("transfer-encoding", "Chunked"),
        ]);
        assert!(is_streaming_response(&h, None));
    }

    #[test]
    fn json_without_stream_flag_is_buffered() {
        let h = headers(&[("content-type", "application/json")]);
        assert!(!is_streaming_response(&h, None));

        let body = json!({"model": "x", "messages": []});
        assert!(!is_streaming_response(&h, Some(&body)));
    }

    #[test]
    fn request_stream_flag_breaks_the_tie() {
        let h = headers(&[("content-type", "application/json")]);
        assert!(is_streaming_response(&h, Some(&json!({"stream": true}))));
        assert!(!is_streaming_response(&h, Some(&json!({"stream": false}))));
    }

    #[test]
    fn stream_flag_uses_json_truthiness() {
        let h = headers(&[("content-type", "application/json")]);
        assert!(is_streaming_response(&h, Some(&json!({"stream": 1}))));
        assert!(is_streaming_response(&h, Some(&json!({"stream": "yes"}))));
        assert!(!is_streaming_response(&h, Some(&json!({"stream": 0}))));
        assert!(!is_streaming_response(&h, Some(&json!({"stream": ""}))));
        assert!(!is_streaming_response(&h, Some(&json!({"stream": null}))));
    }

    #[test]
    fn event_stream_wins_regardless_of_request_body() {
        let h = headers(&[("content-type", "text/event-stream")]);
        assert!(is_streaming_response(&h, Some(&json!({"stream": false}))));
    }

    #[test]
    fn relay_headers_drop_transport_fields() {
        let h = headers(&[
            ("content-type", "application/json"),
            ("content-length", "42"),
            ("transfer-encoding", "chunked"),
            ("x-request-id", "abc"),
        ]);
        let filtered = relay_headers(&h);
        assert!(filtered.get("content-length").is_none());
        assert!(filtered.get("transfer-encoding").is_none());
        assert_eq!(filtered.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn streaming_headers_add_cors_and_cache_fields() {
        let h = headers(&[("content-type", "text/event-stream")]);
        let out = streaming_relay_headers(&h);
        assert_eq!(out.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            out.get("access-control-allow-methods").unwrap(),
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(out.get("access-control-allow-headers").unwrap(), "*");
        assert_eq!(out.get("cache-control").unwrap(), "no-cache");
        assert_eq!(out.get("content-type").unwrap(), "text/event-stream");
    }
}
