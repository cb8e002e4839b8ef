use std::sync::Arc;

use crate::models::DashboardConfig;
use crate::modules::persistence::request_db::RequestStore;

// Axum application state for the dashboard API listener.
#[derive(Clone)]
pub struct DashboardState {
    pub store: Arc<RequestStore>,
    pub config: Arc<DashboardConfig>,
    /// Surfaced by /login so the UI can prefill the credential field.
    pub default_api_key: String,
}
