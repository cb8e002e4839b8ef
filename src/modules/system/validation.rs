use crate::models::AppConfig;

pub fn validate_app_config(config: &AppConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let base = config.proxy.upstream_base_url.trim();
    if base.is_empty() {
        errors.push("proxy.upstream_base_url must not be empty".to_string());
    } else if reqwest::Url::parse(base).is_err() {
        errors.push(format!(
            "proxy.upstream_base_url is not a valid URL: {}",
            base
        ));
    }

    if config.proxy.port == 0 {
        errors.push("proxy.port must not be 0".to_string());
    }
    if config.dashboard.port == 0 {
        errors.push("dashboard.port must not be 0".to_string());
    }
    if config.proxy.port == config.dashboard.port && config.proxy.host == config.dashboard.host {
        errors.push("proxy and dashboard listeners must not share an address".to_string());
    }

    if config.dashboard.page_size == 0 {
        errors.push("dashboard.page_size must be at least 1".to_string());
    }
    if config.proxy.request_timeout == 0 {
        errors.push("proxy.request_timeout must be at least 1 second".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
