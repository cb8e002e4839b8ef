use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::proxy::forward;
use crate::proxy::state::ProxyState;

/// Every method and path goes through the forwarder; the proxy listener
/// reserves no routes of its own so nothing shadows the upstream.
pub fn build_proxy_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(forward::forward_request)
        .with_state(state)
}

pub async fn start(
    host: &str,
    port: u16,
    state: ProxyState,
) -> Result<tokio::task::JoinHandle<()>, String> {
    let app = build_proxy_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Address {} binding failed: {}", addr, e))?;

    info!("Proxy server started at http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Proxy server terminated: {:?}", e);
        }
    });

    Ok(handle)
}
