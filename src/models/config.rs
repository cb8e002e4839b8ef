use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Base URL every inbound path is appended to, e.g. `https://openrouter.ai/api/v1`.
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// Injected as `Authorization: Bearer <key>` when the caller sends none.
    #[serde(default)]
    pub default_api_key: String,
    /// End-to-end deadline per upstream exchange, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            upstream_base_url: default_upstream_base_url(),
            default_api_key: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Credential that sees every record regardless of owner.
    #[serde(default)]
    pub admin_api_key: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_dashboard_port(),
            page_size: default_page_size(),
            admin_api_key: String::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_dashboard_port() -> u16 {
    8081
}

fn default_upstream_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_page_size() -> usize {
    20
}
