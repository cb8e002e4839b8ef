use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::web::scope::resolve_scope;
use crate::web::state::DashboardState;

/// Reads the caller's credential from the `apikey` cookie, resolves its
/// scope and attaches it to the request. Everything except /login (and CORS
/// preflight) requires a credential.
pub async fn auth_middleware(
    State(state): State<DashboardState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    if request.uri().path() == "/login" {
        return next.run(request).await;
    }

    let apikey = apikey_from_cookies(request.headers());
    match resolve_scope(&apikey, &state.config.admin_api_key) {
        Some(scope) => {
            let (mut parts, body) = request.into_parts();
            parts.extensions.insert(scope);
            let request = Request::from_parts(parts, body);
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "API Key required"})),
        )
            .into_response(),
    }
}

fn apikey_from_cookies(headers: &HeaderMap) -> String {
    let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return String::new();
    };

    for pair in cookie_header.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some("apikey") {
            return parts.next().unwrap_or("").trim().to_string();
        }
    }

    String::new()
}
