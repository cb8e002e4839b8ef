pub mod forwarding;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::models::ProxyConfig;
use crate::modules::persistence::request_db::{RequestRecord, RequestStore, Scope};
use crate::proxy::server::build_proxy_router;
use crate::proxy::state::ProxyState;
use crate::proxy::upstream::UpstreamClient;

/// Serves a router on an ephemeral port and returns its base URL.
pub(crate) async fn spawn_router(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

pub(crate) async fn spawn_proxy(upstream_base: &str, store: Arc<RequestStore>) -> String {
    let config = ProxyConfig {
        upstream_base_url: upstream_base.to_string(),
        default_api_key: "sk-default".to_string(),
        request_timeout: 30,
        ..Default::default()
    };
    let state = ProxyState {
        store,
        upstream: Arc::new(UpstreamClient::new(upstream_base, 30).expect("upstream client")),
        config: Arc::new(config),
    };
    spawn_router(build_proxy_router(state)).await
}

/// Polls until some record has its response fields set.
pub(crate) async fn wait_for_completed_record(store: &RequestStore) -> RequestRecord {
    for _ in 0..200 {
        let records = store.list(10, 0, &Scope::Unrestricted).expect("list");
        if let Some(record) = records.iter().find(|r| r.response_status.is_some()) {
            return record.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no record completed in time");
}
