//! mcpwire - the MCP server side of gatekeeper
//!
//! A tools-only implementation of the MCP 2025-06-18 wire protocol on axum.
//! Applications implement [`Handler`]; this crate owns JSON-RPC framing,
//! sessions, and both HTTP transports.
//!
//! # Transports
//!
//! - **SSE**: `GET /sse` opens the event stream, `POST /messages/?session_id=..`
//!   carries requests whose responses are delivered on the stream.
//! - **Streamable HTTP**: `POST /mcp` answers inline, either as JSON or as an
//!   event stream when the client accepts `text/event-stream`. `DELETE /mcp`
//!   ends the session.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcpwire::{CallToolResult, ErrorData, Handler, Implementation, Tool};
//! use async_trait::async_trait;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     fn tools(&self) -> Vec<Tool> {
//!         vec![Tool::new("echo", "Echo the input back")]
//!     }
//!
//!     async fn call_tool(&self, _name: &str, args: serde_json::Value)
//!         -> Result<CallToolResult, ErrorData>
//!     {
//!         Ok(CallToolResult::text(args.to_string()))
//!     }
//!
//!     fn server_info(&self) -> Implementation {
//!         Implementation::new("echo", "0.1.0")
//!     }
//! }
//!
//! let state = std::sync::Arc::new(mcpwire::McpState::new(Echo));
//! let app = mcpwire::router(state);
//! ```

pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use types::content::Content;
pub use types::error::ErrorData;
pub use types::jsonrpc::{JsonRpcMessage, RequestId};
pub use types::progress::{ProgressNotification, ProgressToken};
pub use types::protocol::{Implementation, ServerCapabilities, PROTOCOL_VERSION};
pub use types::tool::{CallToolResult, Tool, ToolSchema};

pub use session::{spawn_cleanup_task, InMemorySessionStore, Session, SessionStats, SessionStore};

pub use protocol::{Handler, ProgressSender, ToolContext};

pub use transport::{router, McpState, SESSION_HEADER};
