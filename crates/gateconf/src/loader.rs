//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, GateConfig, Secret};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/gatekeeper/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("gatekeeper/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("gatekeeper.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// One config file. Every key is optional; present keys overlay earlier
/// sources.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFile,
    #[serde(default)]
    pub auth: AuthFile,
    #[serde(default)]
    pub logging: LoggingFile,
    #[serde(default)]
    pub llm: LlmFile,
    #[serde(default)]
    pub keyvault: KeyVaultFile,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub environment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthFile {
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingFile {
    pub level: Option<String>,
    pub to_file: Option<bool>,
    pub file_path: Option<String>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LlmFile {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KeyVaultFile {
    pub url: Option<String>,
    pub secret_name: Option<String>,
    pub refresh_secs: Option<u64>,
}

/// Load one TOML file.
pub fn load_from_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Overlay the keys a file sets onto `config`.
pub fn merge_file(config: &mut GateConfig, file: FileConfig) {
    let FileConfig {
        server,
        auth,
        logging,
        llm,
        keyvault,
    } = file;

    if let Some(v) = server.host {
        config.server.host = v;
    }
    if let Some(v) = server.port {
        config.server.port = v;
    }
    if let Some(v) = server.environment {
        config.server.environment = v;
    }

    if let Some(v) = non_empty(auth.key) {
        config.auth.key = Some(Secret::new(v));
    }

    if let Some(v) = logging.level {
        config.logging.level = v;
    }
    if let Some(v) = logging.to_file {
        config.logging.to_file = v;
    }
    if let Some(v) = logging.file_path {
        config.logging.file_path = expand_path(&v);
    }
    if let Some(v) = non_empty(logging.otlp_endpoint) {
        config.logging.otlp_endpoint = Some(v);
    }

    if let Some(v) = non_empty(llm.api_key) {
        config.llm.api_key = Some(Secret::new(v));
    }
    if let Some(v) = llm.base_url {
        config.llm.base_url = v;
    }
    if let Some(v) = llm.model {
        config.llm.model = v;
    }

    if let Some(v) = non_empty(keyvault.url) {
        config.keyvault.url = Some(v);
    }
    if let Some(v) = keyvault.secret_name {
        config.keyvault.secret_name = v;
    }
    if let Some(v) = keyvault.refresh_secs {
        config.keyvault.refresh_secs = v;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `true/1/yes/on` in any case.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut GateConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_overrides_from(config, sources, |key| env::var(key).ok())
}

/// Apply overrides from any lookup. Empty values count as unset.
pub fn apply_overrides_from<F>(
    config: &mut GateConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |key: &str| -> Option<String> {
        let value = lookup(key).filter(|v| !v.is_empty())?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("MCP_SERVER_AUTH_KEY") {
        config.auth.key = Some(Secret::new(v));
    }

    if let Some(v) = take("MCP_SERVER_HOST") {
        config.server.host = v;
    }
    if let Some(v) = take("MCP_SERVER_PORT") {
        config.server.port = v.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "MCP_SERVER_PORT".to_string(),
            message: format!("'{}' is not a port number", v),
        })?;
    }
    if let Some(v) = take("ENVIRONMENT") {
        config.server.environment = v;
    }

    if let Some(v) = take("LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = take("LOG_TO_FILE") {
        config.logging.to_file = parse_flag(&v);
    }
    if let Some(v) = take("LOG_FILE_PATH") {
        config.logging.file_path = expand_path(&v);
    }
    if let Some(v) = take("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.logging.otlp_endpoint = Some(v);
    }

    if let Some(v) = take("LLM_API_KEY") {
        config.llm.api_key = Some(Secret::new(v));
    }
    if let Some(v) = take("LLM_BASE_URL") {
        config.llm.base_url = v;
    }
    if let Some(v) = take("LLM_MODEL") {
        config.llm.model = v;
    }

    if let Some(v) = take("AZURE_KEY_VAULT_URL") {
        config.keyvault.url = Some(v);
    }
    if let Some(v) = take("LLM_API_KEY_SECRET_NAME") {
        config.keyvault.secret_name = v;
    }
    if let Some(v) = take("KEYVAULT_REFRESH_SECS") {
        config.keyvault.refresh_secs = v.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "KEYVAULT_REFRESH_SECS".to_string(),
            message: format!("'{}' is not a number of seconds", v),
        })?;
    }

    Ok(())
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        if let Ok(var_value) = env::var(var_name) {
            let base = PathBuf::from(var_value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/logs/gatekeeper.log");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("logs/gatekeeper.log"));
    }

    #[test]
    fn test_expand_path_relative_untouched() {
        assert_eq!(expand_path("logs/x.log"), PathBuf::from("logs/x.log"));
    }

    #[test]
    fn test_parse_flag() {
        for yes in ["true", "1", "YES", "On"] {
            assert!(parse_flag(yes), "{}", yes);
        }
        for no in ["false", "0", "off", "nope", ""] {
            assert!(!parse_flag(no), "{}", no);
        }
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = parse_toml(
            r#"
[server]
port = 9100

[llm]
model = "gpt-4o-mini"
"#,
            Path::new("test.toml"),
        )
        .unwrap();

        let mut config = GateConfig::default();
        merge_file(&mut config, file);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_toml("[server\nport = ", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_env_overrides_recorded() {
        let mut config = GateConfig::default();
        let mut sources = ConfigSources::default();

        apply_overrides_from(
            &mut config,
            &mut sources,
            lookup(&[
                ("MCP_SERVER_AUTH_KEY", "k"),
                ("MCP_SERVER_PORT", "8123"),
                ("LOG_TO_FILE", "yes"),
                ("KEYVAULT_REFRESH_SECS", "600"),
            ]),
        )
        .unwrap();

        assert_eq!(config.auth.key.as_ref().map(Secret::expose), Some("k"));
        assert_eq!(config.server.port, 8123);
        assert!(config.logging.to_file);
        assert_eq!(config.keyvault.refresh_secs, 600);
        assert_eq!(sources.env_overrides.len(), 4);
    }

    #[test]
    fn test_empty_env_value_is_unset() {
        let mut config = GateConfig::default();
        let mut sources = ConfigSources::default();

        apply_overrides_from(
            &mut config,
            &mut sources,
            lookup(&[("MCP_SERVER_AUTH_KEY", ""), ("LLM_MODEL", "")]),
        )
        .unwrap();

        assert!(config.auth.key.is_none());
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert!(sources.env_overrides.is_empty());
    }

    #[test]
    fn test_bad_port_is_invalid() {
        let mut config = GateConfig::default();
        let mut sources = ConfigSources::default();

        let err = apply_overrides_from(
            &mut config,
            &mut sources,
            lookup(&[("MCP_SERVER_PORT", "eighty")]),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "MCP_SERVER_PORT"));
    }
}
