//! Azure Key Vault source for the LLM API key.
//!
//! Tokens come from the Azure CLI. A failed fetch never stops the server:
//! startup falls back to the configured key, and the refresh task keeps the
//! last good value.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolbox::{Dependency, DependencyRegistry, SecretString};

use crate::registry::LLM_API_KEY;

pub const VAULT_RESOURCE: &str = "https://vault.azure.net";
pub const API_VERSION: &str = "7.4";

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("could not obtain an access token: {0}")]
    Token(String),

    #[error("request to Key Vault failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Key Vault answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("secret '{0}' has no value")]
    Empty(String),
}

/// Source of bearer tokens for the vault.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, KeyVaultError>;
}

/// `az account get-access-token --resource https://vault.azure.net`
#[derive(Debug, Default)]
pub struct AzureCliToken;

#[async_trait]
impl TokenProvider for AzureCliToken {
    async fn token(&self) -> Result<String, KeyVaultError> {
        let output = tokio::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                VAULT_RESOURCE,
                "--query",
                "accessToken",
                "-o",
                "tsv",
            ])
            .output()
            .await
            .map_err(|e| KeyVaultError::Token(format!("failed to run az: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeyVaultError::Token(stderr.trim().to_string()));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(KeyVaultError::Token("az returned an empty token".into()));
        }
        Ok(token)
    }
}

/// A fixed token, for vault emulators and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, KeyVaultError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

pub struct KeyVaultClient {
    http: reqwest::Client,
    vault_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl KeyVaultClient {
    pub fn new(http: reqwest::Client, vault_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            vault_url: vault_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// `GET {vault}/secrets/{name}?api-version=7.4`
    #[tracing::instrument(skip(self), fields(vault = %self.vault_url))]
    pub async fn fetch_secret(&self, name: &str) -> Result<SecretString, KeyVaultError> {
        let token = self.tokens.token().await?;

        let response = self
            .http
            .get(format!("{}/secrets/{}", self.vault_url, name))
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeyVaultError::Status { status, body });
        }

        let bundle: SecretBundle = response.json().await?;
        match bundle.value {
            Some(value) if !value.is_empty() => Ok(SecretString::new(value)),
            _ => Err(KeyVaultError::Empty(name.to_string())),
        }
    }
}

/// The LLM key at startup: the vault when configured and reachable, else
/// the configured fallback.
pub async fn initial_llm_key(
    vault: Option<&KeyVaultClient>,
    secret_name: &str,
    fallback: Option<SecretString>,
) -> Option<SecretString> {
    let Some(vault) = vault else {
        return fallback;
    };

    match vault.fetch_secret(secret_name).await {
        Ok(secret) => {
            tracing::info!(secret = secret_name, "Loaded LLM API key from Key Vault");
            Some(secret)
        }
        Err(e) => {
            tracing::warn!(
                secret = secret_name,
                error = %e,
                fallback = fallback.is_some(),
                "Key Vault fetch failed; using configured LLM API key"
            );
            fallback
        }
    }
}

/// Re-fetch the secret every `interval` and rotate it into the registry.
pub fn spawn_refresh_task(
    vault: Arc<KeyVaultClient>,
    secret_name: String,
    registry: Arc<DependencyRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; startup already fetched.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Key Vault refresh task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match vault.fetch_secret(&secret_name).await {
                        Ok(secret) => {
                            if let Err(e) = registry.rotate(LLM_API_KEY, Dependency::secret(secret)) {
                                tracing::error!(error = %e, "Cannot rotate LLM API key");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Key Vault refresh failed; keeping current key");
                        }
                    }
                }
            }
        }
    })
}
