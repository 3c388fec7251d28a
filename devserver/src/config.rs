//! Configuration for the development server.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Server-level settings. Middleware settings live in `widgetry.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ApiConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

impl ServerConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (DEVSERVER__SECTION__KEY format)
    /// 2. devserver.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("devserver")
    }

    fn load_from(name: &str) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .add_source(File::with_name(name).required(false))
            .add_source(
                Environment::with_prefix("DEVSERVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_api_config() {
        let api = ApiConfig::default();
        assert_eq!(api.host, "127.0.0.1");
        assert_eq!(api.port, 8080);
        assert_eq!(api.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "[api]\nport = 9090\n").unwrap();

        let config = ServerConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.api.host, "127.0.0.1");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load_from("/nonexistent/devserver").unwrap();
        assert_eq!(config.api.port, 8080);
    }
}
