//! The gatekeeper HTTP server.
//!
//! Discovery and registration happen once in [`Gatekeeper::new`]; after that
//! the tool surface is frozen and only registry values change.

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{middleware, routing::get, Json, Router};
use gateconf::GateConfig;
use mcpwire::{Implementation, McpState, SessionStore};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use toolbox::{
    discover, require_api_key, AuthGate, DependencyRegistry, DiscoveryError, RegistrationSurface,
    SecretString, ToolboxHandler, HEALTH_PATH,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::keyvault::{self, AzureCliToken, KeyVaultClient};
use crate::registry;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const SESSION_MAX_IDLE: Duration = Duration::from_secs(30 * 60);

const INSTRUCTIONS: &str = "Tools discovered at startup. Call tools/list for the catalog.";

/// Server state for the health endpoint.
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Instant,
    pub environment: String,
    pub tools: usize,
    pub sessions: Arc<dyn SessionStore>,
}

pub async fn handle_health(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment,
        "tools": state.tools,
        "sessions": state.sessions.stats(),
    }))
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}

/// A fully assembled server, ready to serve.
pub struct Gatekeeper {
    config: GateConfig,
    registry: Arc<DependencyRegistry>,
    mcp: Arc<McpState<ToolboxHandler>>,
    gate: Arc<AuthGate>,
    vault: Option<Arc<KeyVaultClient>>,
    skipped: Vec<DiscoveryError>,
    start_time: Instant,
}

impl Gatekeeper {
    /// Build the registry, discover `toolbox_actions` and freeze the surface.
    ///
    /// A name registered twice is an error; modules that fail to load are
    /// only logged.
    pub fn new(config: GateConfig, llm_api_key: Option<SecretString>) -> Result<Self> {
        let auth_key = config
            .auth_key()
            .filter(|k| !k.is_empty())
            .context("MCP_SERVER_AUTH_KEY is not set")?;
        let gate = Arc::new(AuthGate::new(SecretString::new(auth_key.expose())));

        let registry = Arc::new(registry::build(&config, llm_api_key)?);

        let discovery = discover(toolbox_actions::NAMESPACE, &registry);
        let mut builder = RegistrationSurface::builder();
        builder
            .publish_all(discovery.wrappers)
            .context("Tool registration failed")?;
        let surface = Arc::new(builder.build());

        info!(
            tools = surface.len(),
            skipped = discovery.failures.len(),
            names = ?surface.names().collect::<Vec<_>>(),
            "Tool surface ready"
        );

        let handler = ToolboxHandler::new(
            surface,
            Implementation::new("gatekeeper", env!("CARGO_PKG_VERSION")),
        )
        .with_instructions(INSTRUCTIONS);

        Ok(Self {
            config,
            registry,
            mcp: Arc::new(McpState::new(handler)),
            gate,
            vault: None,
            skipped: discovery.failures,
            start_time: Instant::now(),
        })
    }

    /// Refresh `llm_api_key` from this vault while serving.
    pub fn with_key_vault(mut self, vault: Arc<KeyVaultClient>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    pub fn surface(&self) -> &Arc<RegistrationSurface> {
        self.mcp.handler.surface()
    }

    /// Modules discovery had to skip.
    pub fn skipped(&self) -> &[DiscoveryError] {
        &self.skipped
    }

    /// MCP routes plus `/health`, all behind the auth gate.
    pub fn router(&self) -> Router {
        let health_state = HealthState {
            start_time: self.start_time,
            environment: self.config.server.environment.clone(),
            tools: self.surface().len(),
            sessions: Arc::clone(&self.mcp.sessions),
        };

        let health_router = Router::new()
            .route(HEALTH_PATH, get(handle_health))
            .with_state(health_state);

        mcpwire::router(Arc::clone(&self.mcp))
            .merge(health_router)
            .fallback(handle_not_found)
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.gate),
                require_api_key,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the
    /// background tasks.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();

        let cleanup = mcpwire::spawn_cleanup_task(
            Arc::clone(&self.mcp.sessions),
            CLEANUP_INTERVAL,
            SESSION_MAX_IDLE,
            cancel.clone(),
        );

        let refresh = match (&self.vault, self.config.keyvault.refresh_secs) {
            (Some(vault), secs) if secs > 0 => {
                info!(every_secs = secs, "Key Vault refresh enabled");
                Some(keyvault::spawn_refresh_task(
                    Arc::clone(vault),
                    self.config.keyvault.secret_name.clone(),
                    Arc::clone(&self.registry),
                    Duration::from_secs(secs),
                    cancel.clone(),
                ))
            }
            _ => None,
        };

        let app = self.router();
        let addr = listener
            .local_addr()
            .context("Listener has no local address")?;

        info!("Gatekeeper ready on {}", addr);
        info!("   MCP (Streamable): POST http://{}/mcp", addr);
        info!("   MCP (SSE): GET http://{}/sse + POST http://{}/messages/", addr, addr);
        info!("   Health: GET http://{}/health", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error");

        cancel.cancel();
        if let Err(e) = cleanup.await {
            tracing::warn!(error = %e, "Session cleanup task ended abnormally");
        }
        if let Some(refresh) = refresh {
            if let Err(e) = refresh.await {
                tracing::warn!(error = %e, "Key Vault refresh task ended abnormally");
            }
        }

        served?;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolve the LLM key, assemble the server and run until SIGINT/SIGTERM.
pub async fn run(config: GateConfig) -> Result<()> {
    info!(
        environment = %config.server.environment,
        addr = %config.server.bind_addr(),
        "Gatekeeper starting"
    );

    let vault = match config.keyvault.url.as_deref() {
        Some(url) => {
            info!(vault = url, secret = %config.keyvault.secret_name, "Using Azure Key Vault");
            Some(Arc::new(KeyVaultClient::new(
                registry::http_client()?,
                url,
                Arc::new(AzureCliToken),
            )))
        }
        None => None,
    };

    let llm_api_key = keyvault::initial_llm_key(
        vault.as_deref(),
        &config.keyvault.secret_name,
        registry::configured_llm_key(&config),
    )
    .await;

    let addr = config.server.bind_addr();
    let mut gatekeeper = Gatekeeper::new(config, llm_api_key)?;
    if let Some(vault) = vault {
        gatekeeper = gatekeeper.with_key_vault(vault);
    }

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    gatekeeper.serve(listener, shutdown_signal()).await
}

pub async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received SIGINT, shutting down..."),
                Err(e) => tracing::error!(error = %e, "Cannot listen for SIGINT, shutting down"),
            }
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
