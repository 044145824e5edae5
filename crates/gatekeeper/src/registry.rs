//! Dependency registry contents.
//!
//! The key set is fixed here. A procedure parameter with one of these names
//! is injected and never shown to callers.

use anyhow::{Context, Result};
use gateconf::GateConfig;
use std::time::Duration;
use toolbox::{Dependency, DependencyRegistry, SecretString};

pub const LLM_API_KEY: &str = "llm_api_key";
pub const LLM_BASE_URL: &str = "llm_base_url";
pub const LLM_MODEL: &str = "llm_model";
pub const HTTP_CLIENT: &str = "http_client";
pub const PROGRESS: &str = "progress";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound client shared by every procedure unit.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("gatekeeper/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// `llm_api_key` stays declared but empty when no key is known, so units
/// that need it fail at call time instead of disappearing.
pub fn build(config: &GateConfig, llm_api_key: Option<SecretString>) -> Result<DependencyRegistry> {
    let registry = DependencyRegistry::builder()
        .bind_opt(LLM_API_KEY, llm_api_key.map(Dependency::secret))
        .bind(LLM_BASE_URL, Dependency::value(config.llm.base_url.clone()))
        .bind(LLM_MODEL, Dependency::value(config.llm.model.clone()))
        .bind(HTTP_CLIENT, Dependency::shared(http_client()?))
        .bind(PROGRESS, Dependency::Progress)
        .build();

    if registry.resolve(LLM_API_KEY).is_none() {
        tracing::warn!("No LLM API key configured; tools that need one will fail");
    }
    tracing::debug!(?registry, "Dependency registry built");

    Ok(registry)
}

/// The configured (non-vault) LLM key.
pub fn configured_llm_key(config: &GateConfig) -> Option<SecretString> {
    config
        .llm
        .api_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .map(|k| SecretString::new(k.expose()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateconf::Secret;

    #[test]
    fn test_key_set() {
        let registry = build(&GateConfig::default(), None).unwrap();
        let keys: Vec<_> = registry.keys().collect();
        assert_eq!(
            keys,
            vec![HTTP_CLIENT, LLM_API_KEY, LLM_BASE_URL, LLM_MODEL, PROGRESS]
        );
        assert!(registry.resolve(LLM_API_KEY).is_none());
        assert!(registry.resolve(HTTP_CLIENT).is_some());
    }

    #[test]
    fn test_llm_settings_from_config() {
        let mut config = GateConfig::default();
        config.llm.model = "gpt-4o-mini".into();

        let registry = build(&config, Some(SecretString::new("sk"))).unwrap();
        let model = registry.resolve(LLM_MODEL).unwrap();
        assert!(matches!(model.as_ref(), Dependency::Value(v) if v == "gpt-4o-mini"));
        assert!(matches!(
            registry.resolve(LLM_API_KEY).unwrap().as_ref(),
            Dependency::Secret(s) if s.expose() == "sk"
        ));
    }

    #[test]
    fn test_configured_key_ignores_empty() {
        let mut config = GateConfig::default();
        assert!(configured_llm_key(&config).is_none());

        config.llm.api_key = Some(Secret::new(""));
        assert!(configured_llm_key(&config).is_none());

        config.llm.api_key = Some(Secret::new("sk-env"));
        assert_eq!(configured_llm_key(&config).unwrap().expose(), "sk-env");
    }
}
