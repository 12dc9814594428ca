//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::config::schema::{ClientConfig, ServerConfig};
use crate::config::validation::{validate_client_config, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate server configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = parse_file(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate client configuration from a TOML file.
pub fn load_client_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = parse_file(path)?;
    validate_client_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("enproxy-{}-{}.toml", name, std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let path = write_temp(
            "partial",
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [tunnel]
            host = "proxy1.example.com"
            idle_interval_ms = 250
            "#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.tunnel.host.as_deref(), Some("proxy1.example.com"));
        assert_eq!(config.tunnel.idle_interval_ms, 250);
        assert_eq!(config.tunnel.buffer_size, 8096);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn invalid_values_rejected() {
        let path = write_temp("invalid", "[tunnel]\nbuffer_size = 0\n");
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn syntax_errors_rejected() {
        let path = write_temp("syntax", "proxy_address = [\n");
        assert!(matches!(load_client_config(&path), Err(ConfigError::Parse(_))));
        let _ = fs::remove_file(path);
    }
}
