use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppResult;
use crate::modules::persistence::request_db::{RequestRecord, Scope};
use crate::web::state::DashboardState;

#[derive(Debug, Deserialize)]
pub struct RequestsQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default)]
    pub search: String,
}

fn default_page() -> usize {
    1
}

pub async fn login(State(state): State<DashboardState>) -> Response {
    Json(json!({"default_apikey": state.default_api_key})).into_response()
}

pub async fn api_requests(
    State(state): State<DashboardState>,
    Extension(scope): Extension<Scope>,
    Query(query): Query<RequestsQuery>,
) -> Response {
    let page = query.page.max(1);
    let page_size = state.config.page_size;
    let search = query.search.trim().to_string();

    let result: AppResult<(Vec<RequestRecord>, i64)> = if !search.is_empty() {
        state
            .store
            .search_async(search, page_size, scope)
            .await
            .map(|records| {
                let total = records.len() as i64;
                (records, total)
            })
    } else {
        let offset = (page - 1) * page_size;
        match state.store.list_async(page_size, offset, scope.clone()).await {
            Ok(records) => state
                .store
                .count_async(scope)
                .await
                .map(|total| (records, total)),
            Err(e) => Err(e),
        }
    };

    match result {
        Ok((requests, total_count)) => Json(json!({
            "requests": requests,
            "total_count": total_count,
            "page": page,
            "page_size": page_size,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to query request records: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn api_request_detail(
    State(state): State<DashboardState>,
    Path(request_id): Path<String>,
) -> Response {
    match state.store.get_async(&request_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Request not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to load record {}: {}", request_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn api_stats(
    State(state): State<DashboardState>,
    Extension(scope): Extension<Scope>,
) -> Response {
    let total = match state.store.count_async(scope.clone()).await {
        Ok(total) => total,
        Err(e) => {
            tracing::error!("Failed to count records: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };
    let recent = match state.store.list_async(10, 0, scope).await {
        Ok(recent) => recent,
        Err(e) => {
            tracing::error!("Failed to load recent records: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let success_count = recent
        .iter()
        .filter(|r| {
            r.response_status
                .map(|status| (200..300).contains(&status))
                .unwrap_or(false)
        })
        .count();
    let success_rate = if recent.is_empty() {
        0.0
    } else {
        success_count as f64 / recent.len() as f64 * 100.0
    };

    let durations: Vec<f64> = recent.iter().filter_map(|r| r.duration_ms).collect();
    let avg_response_time = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    Json(json!({
        "total_requests": total,
        "success_rate": round2(success_rate),
        "avg_response_time": round2(avg_response_time),
        "recent_requests_count": recent.len(),
    }))
    .into_response()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }
}
