use tokio::net::TcpListener;
use tracing::{error, info};

use crate::web::routes::build_dashboard_router;
use crate::web::state::DashboardState;

pub async fn start(
    host: &str,
    port: u16,
    state: DashboardState,
) -> Result<tokio::task::JoinHandle<()>, String> {
    let app = build_dashboard_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Address {} binding failed: {}", addr, e))?;

    info!("Dashboard API started at http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Dashboard server terminated: {:?}", e);
        }
    });

    Ok(handle)
}
