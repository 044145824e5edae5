//! gatekeeper - MCP tool server with startup discovery of procedure units
//!
//! Subcommands:
//! - `gatekeeper serve` - Run the HTTP server
//! - `gatekeeper tools` - Print the discovered tool catalog

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gateconf::GateConfig;
use std::path::PathBuf;
use std::sync::Arc;

use gatekeeper::{registry, server, telemetry};

#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(about = "Authenticated MCP server for discovered procedure units")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server
    Serve {
        /// Config file (replaces ./gatekeeper.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind (overrides MCP_SERVER_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides MCP_SERVER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the tool catalog as JSON
    Tools {
        /// Config file (replaces ./gatekeeper.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config =
                GateConfig::load_from(config.as_deref()).context("Failed to load configuration")?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            let guard = telemetry::init(&config.logging, &config.server.environment)?;
            let result = server::run(config).await;
            guard.shutdown();
            result?;
        }
        Commands::Tools { config } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::WARN.into()),
                )
                .with_writer(std::io::stderr)
                .init();

            let config =
                GateConfig::load_from(config.as_deref()).context("Failed to load configuration")?;
            let registry = Arc::new(registry::build(&config, registry::configured_llm_key(&config))?);
            let discovery = toolbox::discover(toolbox_actions::NAMESPACE, &registry);
            for failure in &discovery.failures {
                eprintln!("skipped: {}", failure);
            }

            let catalog: Vec<_> = discovery.wrappers.iter().map(|w| w.tool()).collect();
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
    }

    Ok(())
}
