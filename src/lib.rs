pub mod error;
mod models;
mod modules;
mod proxy;
mod test_utils;
mod web;

use std::sync::Arc;

use modules::persistence::request_db::RequestStore;
use modules::system::logger;
use proxy::state::ProxyState;
use proxy::upstream::UpstreamClient;
use tracing::{error, info, warn};
use web::state::DashboardState;

fn apply_env_overrides(config: &mut models::AppConfig) {
    if let Ok(base) = std::env::var("APISCRIBE_UPSTREAM_BASE") {
        if !base.trim().is_empty() {
            info!("Using upstream base URL from environment");
            config.proxy.upstream_base_url = base;
        }
    }

    if let Ok(key) =
        std::env::var("APISCRIBE_DEFAULT_API_KEY").or_else(|_| std::env::var("DEFAULT_APIKEY"))
    {
        if !key.trim().is_empty() {
            info!("Using default API key from environment");
            config.proxy.default_api_key = key;
        }
    }

    if let Ok(key) =
        std::env::var("APISCRIBE_ADMIN_API_KEY").or_else(|_| std::env::var("SUPER_ADMIN_APIKEY"))
    {
        if !key.trim().is_empty() {
            info!("Using admin API key from environment");
            config.dashboard.admin_api_key = key;
        }
    }

    if let Ok(port) = std::env::var("APISCRIBE_PROXY_PORT") {
        match port.trim().parse() {
            Ok(parsed) => config.proxy.port = parsed,
            Err(_) => warn!("Ignoring invalid proxy port value: {}", port),
        }
    }

    if let Ok(port) = std::env::var("APISCRIBE_DASHBOARD_PORT") {
        match port.trim().parse() {
            Ok(parsed) => config.dashboard.port = parsed,
            Err(_) => warn!("Ignoring invalid dashboard port value: {}", port),
        }
    }
}

async fn start_services() -> Result<(), String> {
    let mut config = modules::system::config::load_app_config()?;
    apply_env_overrides(&mut config);
    modules::system::validation::validate_app_config(&config).map_err(|errors| {
        format!("configuration_validation_failed:\n{}", errors.join("\n"))
    })?;

    let db_path = modules::system::paths::get_db_path()?;
    let store = Arc::new(
        RequestStore::open(&db_path)
            .map_err(|e| format!("failed_to_open_request_store: {}", e))?,
    );
    let upstream = Arc::new(UpstreamClient::new(
        &config.proxy.upstream_base_url,
        config.proxy.request_timeout,
    )?);

    info!("Forwarding to upstream {}", config.proxy.upstream_base_url);

    let proxy_state = ProxyState {
        store: Arc::clone(&store),
        upstream,
        config: Arc::new(config.proxy.clone()),
    };
    let _proxy_handle =
        proxy::server::start(&config.proxy.host, config.proxy.port, proxy_state).await?;

    let dashboard_state = DashboardState {
        store,
        config: Arc::new(config.dashboard.clone()),
        default_api_key: config.proxy.default_api_key.clone(),
    };
    let _dashboard_handle =
        web::server::start(&config.dashboard.host, config.dashboard.port, dashboard_state).await?;

    Ok(())
}

pub fn run() {
    logger::init_logger();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        if let Err(e) = start_services().await {
            error!("{}", e);
            std::process::exit(1);
        }

        info!("apiscribe is running. Press Ctrl+C to exit.");
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lock_env, ScopedEnvVar};

    #[test]
    fn env_overrides_take_precedence() {
        let _guard = lock_env();
        let _clear_key = ScopedEnvVar::unset("APISCRIBE_DEFAULT_API_KEY");
        let _clear_admin = ScopedEnvVar::unset("APISCRIBE_ADMIN_API_KEY");
        let _base = ScopedEnvVar::set("APISCRIBE_UPSTREAM_BASE", "https://alt.example.com/v2");
        let _key = ScopedEnvVar::set("DEFAULT_APIKEY", "sk-env");
        let _admin = ScopedEnvVar::set("SUPER_ADMIN_APIKEY", "sk-root");
        let _port = ScopedEnvVar::set("APISCRIBE_PROXY_PORT", "9090");

        let mut config = models::AppConfig::new();
        apply_env_overrides(&mut config);

        assert_eq!(config.proxy.upstream_base_url, "https://alt.example.com/v2");
        assert_eq!(config.proxy.default_api_key, "sk-env");
        assert_eq!(config.dashboard.admin_api_key, "sk-root");
        assert_eq!(config.proxy.port, 9090);
    }

    #[test]
    fn invalid_port_values_are_ignored() {
        let _guard = lock_env();
        let _port = ScopedEnvVar::set("APISCRIBE_PROXY_PORT", "not-a-port");
        let _unset = ScopedEnvVar::unset("APISCRIBE_DASHBOARD_PORT");

        let mut config = models::AppConfig::new();
        apply_env_overrides(&mut config);

        assert_eq!(config.proxy.port, 8080);
        assert_eq!(config.dashboard.port, 8081);
    }
}
