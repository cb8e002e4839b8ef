mod config;

pub use config::{AppConfig, DashboardConfig, ProxyConfig};
