use std::sync::Arc;

use crate::models::ProxyConfig;
use crate::modules::persistence::request_db::RequestStore;
use crate::proxy::upstream::UpstreamClient;

// Axum application state for the forwarding listener. The store and the
// upstream pool are the only long-lived shared objects.
#[derive(Clone)]
pub struct ProxyState {
    pub store: Arc<RequestStore>,
    pub upstream: Arc<UpstreamClient>,
    pub config: Arc<ProxyConfig>,
}
