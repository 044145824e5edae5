//! Configuration loading for gatekeeper.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/gatekeeper/config.toml` (system)
//! 2. `~/.config/gatekeeper/config.toml` (user)
//! 3. `./gatekeeper.toml` or the `--config` path (local override)
//! 4. Environment variables (`MCP_SERVER_*`, `LOG_*`, `LLM_*`, ...)
//!
//! # Example Config
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! environment = "staging"
//!
//! [auth]
//! key = "change-me"
//!
//! [logging]
//! level = "DEBUG"
//! to_file = true
//! file_path = "~/logs/gatekeeper.log"
//! otlp_endpoint = "http://127.0.0.1:4317"
//!
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//!
//! [keyvault]
//! url = "https://my-vault.vault.azure.net"
//! secret_name = "llm-api-key"
//! refresh_secs = 900
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! let config = gateconf::GateConfig::load().expect("config");
//! config.validate().expect("required settings");
//! println!("listening on {}", config.server.bind_addr());
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources, FileConfig};
pub use sections::{AuthConfig, KeyVaultConfig, LlmConfig, LoggingConfig, Secret, ServerConfig};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
}

/// Complete gatekeeper configuration.
#[derive(Debug, Clone, Default)]
pub struct GateConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub keyvault: KeyVaultConfig,
}

impl GateConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an explicit file standing in for `./gatekeeper.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which sources contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = GateConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            loader::merge_file(&mut config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;

        Ok((config, sources))
    }

    /// Check required settings. Reports every missing key at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();

        if self.auth.key.as_ref().map_or(true, Secret::is_empty) {
            missing.push("MCP_SERVER_AUTH_KEY".to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired(missing))
        }
    }

    /// The inbound auth key. Only meaningful after [`GateConfig::validate`].
    pub fn auth_key(&self) -> Option<&Secret> {
        self.auth.key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: &[&str] = &[
        "MCP_SERVER_AUTH_KEY",
        "MCP_SERVER_HOST",
        "MCP_SERVER_PORT",
        "ENVIRONMENT",
        "LOG_LEVEL",
        "LOG_TO_FILE",
        "LOG_FILE_PATH",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        "LLM_API_KEY",
        "LLM_BASE_URL",
        "LLM_MODEL",
        "AZURE_KEY_VAULT_URL",
        "LLM_API_KEY_SECRET_NAME",
        "KEYVAULT_REFRESH_SECS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.environment, "development");
        assert!(config.auth.key.is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        clear_env();
        std::env::set_var("MCP_SERVER_AUTH_KEY", "test_auth_key");
        std::env::set_var("LOG_LEVEL", "DEBUG");

        let config = GateConfig::load().unwrap();
        clear_env();

        assert_eq!(config.auth_key().map(Secret::expose), Some("test_auth_key"));
        assert_eq!(config.logging.level, "DEBUG");
        assert_eq!(config.server.environment, "development");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_empty_auth_key_is_missing() {
        clear_env();
        std::env::set_var("MCP_SERVER_AUTH_KEY", "");

        let config = GateConfig::load().unwrap();
        clear_env();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
        assert_eq!(
            err.to_string(),
            "Missing required configuration: MCP_SERVER_AUTH_KEY"
        );
    }

    #[test]
    #[serial]
    fn test_env_beats_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000
environment = "staging"

[auth]
key = "from-file"
"#
        )
        .unwrap();

        std::env::set_var("MCP_SERVER_PORT", "9001");
        let (config, sources) = GateConfig::load_with_sources_from(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.environment, "staging");
        assert_eq!(config.auth_key().map(Secret::expose), Some("from-file"));
        assert!(sources.files.iter().any(|p| p == file.path()));
        assert_eq!(sources.env_overrides, vec!["MCP_SERVER_PORT".to_string()]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = GateConfig {
            auth: AuthConfig {
                key: Some(Secret::new("super-secret")),
            },
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
