//! gatekeeper - authenticated MCP tool server
//!
//! This library provides:
//! - `keyvault`: Azure Key Vault source and refresh for the LLM API key
//! - `registry`: the dependency keys injected into procedure units
//! - `server`: discovery, the axum router and graceful shutdown
//! - `telemetry`: tracing subscriber and OTLP export

pub mod keyvault;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use server::{run, Gatekeeper};
