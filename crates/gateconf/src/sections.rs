//! Configuration sections.

use std::fmt;
use std::path::PathBuf;

/// A configuration value that must never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Default: 0.0.0.0
    pub host: String,
    /// Default: 8000
    pub port: u16,
    /// Deployment environment name. Default: development
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            environment: "development".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Inbound credential. There is no default: the server refuses to start
/// without one.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub key: Option<Secret>,
}

/// Logging and telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level name as configured (any case). Default: INFO
    pub level: String,
    pub to_file: bool,
    /// Default: logs/gatekeeper.log
    pub file_path: PathBuf,
    /// OTLP gRPC endpoint; unset means no export.
    pub otlp_endpoint: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            to_file: false,
            file_path: PathBuf::from("logs/gatekeeper.log"),
            otlp_endpoint: None,
        }
    }
}

/// Upstream LLM endpoint used by the sub-agent procedure.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Fallback when Key Vault is not configured or fails.
    pub api_key: Option<Secret>,
    pub base_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }
}

/// Azure Key Vault source for the LLM key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyVaultConfig {
    pub url: Option<String>,
    pub secret_name: String,
    /// Seconds between refreshes; 0 disables refresh.
    pub refresh_secs: u64,
}

impl Default for KeyVaultConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret_name: "llm-api-key".to_string(),
            refresh_secs: 0,
        }
    }
}

impl KeyVaultConfig {
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}
