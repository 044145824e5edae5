//! MCP HTTP Transport
//!
//! ## SSE transport
//! - `GET /sse` opens the event stream; the first event is `endpoint`
//!   carrying the POST URL for this session
//! - `POST /messages/?session_id=..` carries JSON-RPC requests; replies are
//!   delivered on the stream
//!
//! ## Streamable HTTP transport
//! - `POST /mcp` answers inline
//! - `DELETE /mcp` terminates the session
//! - Session id travels in the `Mcp-Session-Id` header

mod message;
mod sse;
mod streamable;

pub use message::{message_handler, MessageParams};
pub use sse::{sse_handler, SseParams};
pub use streamable::{delete_handler, streamable_handler, SESSION_HEADER};

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::session::{InMemorySessionStore, SessionStore};
use crate::Handler;

/// POST URL (without query) announced in the SSE `endpoint` event.
pub const MESSAGE_ENDPOINT: &str = "/messages/";

/// Shared state for MCP handlers.
pub struct McpState<H> {
    /// The application's tool handler.
    pub handler: Arc<H>,

    pub sessions: Arc<dyn SessionStore>,
}

impl<H> McpState<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            sessions: Arc::new(InMemorySessionStore::new()),
        }
    }
}

/// Build an axum Router serving both transports.
///
/// Routes:
/// - GET /sse
/// - POST /messages and /messages/
/// - POST /mcp, DELETE /mcp
pub fn router<H: Handler>(state: Arc<McpState<H>>) -> Router {
    Router::new()
        .route("/sse", get(sse_handler::<H>))
        .route("/messages", post(message_handler::<H>))
        .route("/messages/", post(message_handler::<H>))
        .route(
            "/mcp",
            post(streamable_handler::<H>).delete(delete_handler::<H>),
        )
        .with_state(state)
}

/// `notifications/progress` as an SSE `message` event.
pub(crate) fn progress_event(progress: &crate::ProgressNotification) -> axum::response::sse::Event {
    let notification = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": progress,
    });
    axum::response::sse::Event::default()
        .event("message")
        .data(notification.to_string())
}

/// A JSON-RPC reply as an SSE `message` event.
pub(crate) fn reply_event(reply: &crate::types::jsonrpc::JsonRpcReply) -> axum::response::sse::Event {
    axum::response::sse::Event::default()
        .event("message")
        .data(reply.to_json_string())
}
