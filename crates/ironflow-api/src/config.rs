// Server configuration from environment variables

use std::time::Duration;

use anyhow::{Context, Result};

/// Configuration for the API server
#[derive(Debug, Clone, Default)]
pub struct Config {
    database_url: Option<String>,
    bind_addr: Option<String>,
    auto_migrate: Option<String>,
    sweep_interval_secs: Option<String>,
    request_timeout_secs: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_addr: std::env::var("IRONFLOW_BIND_ADDR").ok(),
            auto_migrate: std::env::var("IRONFLOW_AUTO_MIGRATE").ok(),
            sweep_interval_secs: std::env::var("IRONFLOW_SWEEP_INTERVAL_SECS").ok(),
            request_timeout_secs: std::env::var("IRONFLOW_REQUEST_TIMEOUT_SECS").ok(),
        }
    }

    /// Database URL; the only setting without a default
    pub fn database_url(&self) -> Result<String> {
        self.database_url
            .clone()
            .context("DATABASE_URL environment variable required")
    }

    /// Listen address with default
    pub fn bind_addr(&self) -> String {
        self.bind_addr
            .clone()
            .unwrap_or_else(|| "0.0.0.0:42114".to_string())
    }

    /// Whether pending migrations are applied at startup (default true).
    /// When disabled, the server refuses to start with pending migrations.
    pub fn auto_migrate(&self) -> bool {
        self.auto_migrate
            .as_deref()
            .map(|v| !matches!(v, "0" | "false" | "no"))
            .unwrap_or(true)
    }

    /// How often the timeout sweep scans running workflows
    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .sweep_interval_secs
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        Duration::from_secs(secs.max(1))
    }

    /// Deadline applied to every inbound request
    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .request_timeout_secs
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        Duration::from_secs(secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:42114");
        assert!(config.auto_migrate());
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.database_url().is_err());
    }

    #[test]
    fn auto_migrate_recognizes_disable_values() {
        let config = Config {
            auto_migrate: Some("false".to_string()),
            ..Default::default()
        };
        assert!(!config.auto_migrate());
    }
}
