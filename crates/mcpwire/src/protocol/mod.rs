//! MCP Protocol Dispatch
//!
//! Routes JSON-RPC methods to the application [`Handler`].
//!
//! Spans follow the OpenTelemetry JSON-RPC semantic conventions:
//! https://opentelemetry.io/docs/specs/semconv/rpc/json-rpc/

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

use crate::session::SessionStore;
use crate::transport::McpState;
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, RequestId};
use crate::types::progress::{ProgressNotification, ProgressToken, RequestMeta};
use crate::types::protocol::{
    CancelledParams, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
};
use crate::types::tool::{CallToolParams, CallToolResult, ListToolsResult, Tool};

/// Sender for progress notifications.
pub type ProgressSender = tokio::sync::mpsc::Sender<ProgressNotification>;

/// Per-call context handed to [`Handler::call_tool_with_context`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,

    /// Progress token from `_meta.progressToken`, if the client asked for progress.
    pub progress_token: Option<ProgressToken>,

    /// Channel back to the client's stream. Only set when a token is present
    /// and the transport can deliver notifications.
    pub progress_sender: Option<ProgressSender>,
}

impl ToolContext {
    /// Send a progress notification. Does nothing if progress was not requested.
    pub async fn send_progress(&self, progress: ProgressNotification) {
        if let Some(ref sender) = self.progress_sender {
            let _ = sender.send(progress).await;
        }
    }

    /// Report `done` out of `total` with a status message.
    pub async fn report(&self, done: f64, total: f64, message: impl Into<String>) {
        if let Some(token) = self.progress_token.clone() {
            self.send_progress(ProgressNotification::absolute(token, done, total, message))
                .await;
        }
    }

    pub fn has_progress(&self) -> bool {
        self.progress_token.is_some() && self.progress_sender.is_some()
    }
}

/// Handler trait for MCP tool servers.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// The tool catalog returned by `tools/list`.
    fn tools(&self) -> Vec<Tool>;

    /// Execute a tool call.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ErrorData>;

    /// Execute a tool call with access to session and progress plumbing.
    ///
    /// Defaults to [`Handler::call_tool`].
    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: Value,
        _context: ToolContext,
    ) -> Result<CallToolResult, ErrorData> {
        self.call_tool(name, arguments).await
    }

    fn server_info(&self) -> Implementation;

    /// Instructions for the LLM, returned from `initialize`.
    fn instructions(&self) -> Option<String> {
        None
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities::with_tools()
    }
}

/// Dispatch a JSON-RPC message to the appropriate handler.
///
/// Span fields:
/// - `rpc.system` = "jsonrpc"
/// - `rpc.method` = the JSON-RPC method name
/// - `rpc.jsonrpc.request_id` = the request ID (if present)
/// - `mcp.session_id` = the MCP session identifier
///
/// `progress` is where `notifications/progress` for this request should go;
/// transports without a stream pass `None`.
pub async fn dispatch<H: Handler>(
    state: &Arc<McpState<H>>,
    session_id: &str,
    message: &JsonRpcMessage,
    progress: Option<ProgressSender>,
) -> Result<Value, ErrorData> {
    let request_id_str = message
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    let span = tracing::info_span!(
        "mcp.dispatch",
        rpc.system = "jsonrpc",
        rpc.method = %message.method,
        rpc.jsonrpc.version = "2.0",
        rpc.jsonrpc.request_id = %request_id_str,
        mcp.session_id = %session_id,
        error.type = tracing::field::Empty,
        rpc.jsonrpc.error_code = tracing::field::Empty,
        rpc.jsonrpc.error_message = tracing::field::Empty,
    );

    async {
        let result = dispatch_inner(state, session_id, message, progress).await;

        if let Err(ref error) = result {
            record_error_on_span(error);
        }

        result
    }
    .instrument(span)
    .await
}

fn record_error_on_span(error: &ErrorData) {
    let span = tracing::Span::current();
    span.record("error.type", error_type_for_code(error.code));
    span.record("rpc.jsonrpc.error_code", error.code);
    span.record("rpc.jsonrpc.error_message", error.message.as_str());

    if error.is_client_error() {
        tracing::debug!(code = error.code, message = %error.message, "Request rejected");
    } else {
        tracing::warn!(code = error.code, message = %error.message, "Request failed");
    }
}

fn error_type_for_code(code: i32) -> &'static str {
    match code {
        ErrorData::PARSE_ERROR => "parse_error",
        ErrorData::INVALID_REQUEST => "invalid_request",
        ErrorData::METHOD_NOT_FOUND => "method_not_found",
        ErrorData::INVALID_PARAMS => "invalid_params",
        ErrorData::INTERNAL_ERROR => "internal_error",
        ErrorData::REQUEST_CANCELLED => "cancelled",
        _ => "application_error",
    }
}

async fn dispatch_inner<H: Handler>(
    state: &Arc<McpState<H>>,
    session_id: &str,
    message: &JsonRpcMessage,
    progress: Option<ProgressSender>,
) -> Result<Value, ErrorData> {
    match message.method.as_str() {
        // Lifecycle
        "initialize" => handle_initialize(state, session_id, message),
        "ping" => Ok(serde_json::json!({})),
        "notifications/initialized" => {
            tracing::debug!(session_id = %session_id, "Client initialized");
            Ok(Value::Null)
        }
        "notifications/cancelled" => handle_cancelled(state, session_id, message),

        // Tools
        "tools/list" => handle_list_tools(state),
        "tools/call" => handle_call_tool(state, session_id, message, progress).await,

        other if other.starts_with("notifications/") => {
            tracing::debug!(method = %other, "Ignoring unknown notification");
            Ok(Value::Null)
        }
        _ => Err(ErrorData::method_not_found(&message.method)),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    message: &JsonRpcMessage,
    what: &str,
) -> Result<T, ErrorData> {
    let params = message
        .params
        .as_ref()
        .ok_or_else(|| ErrorData::invalid_params(format!("Missing {} params", what)))?;

    serde_json::from_value(params.clone())
        .map_err(|e| ErrorData::invalid_params(format!("Invalid {} params: {}", what, e)))
}

fn to_result_value<T: serde::Serialize>(result: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(result)
        .map_err(|e| ErrorData::internal_error(format!("Failed to serialize result: {}", e)))
}

fn handle_initialize<H: Handler>(
    state: &Arc<McpState<H>>,
    session_id: &str,
    request: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: InitializeParams = parse_params(request, "initialize")?;

    if params.protocol_version != crate::PROTOCOL_VERSION {
        tracing::debug!(
            client_version = %params.protocol_version,
            server_version = crate::PROTOCOL_VERSION,
            "Client requested a different protocol version; answering with ours"
        );
    }

    state.sessions.set_initialized(session_id, params.client_info);

    let mut result = InitializeResult::new(state.handler.server_info(), state.handler.capabilities());
    if let Some(instructions) = state.handler.instructions() {
        result = result.with_instructions(instructions);
    }

    to_result_value(&result)
}

fn handle_cancelled<H: Handler>(
    state: &Arc<McpState<H>>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: CancelledParams = parse_params(message, "cancelled")?;

    if state.sessions.cancel_request(session_id, &params.request_id) {
        tracing::info!(
            request_id = %params.request_id,
            reason = params.reason.as_deref().unwrap_or(""),
            "Cancelled in-flight request"
        );
    } else {
        tracing::debug!(request_id = %params.request_id, "Cancel for request not in flight");
    }

    Ok(Value::Null)
}

fn handle_list_tools<H: Handler>(state: &Arc<McpState<H>>) -> Result<Value, ErrorData> {
    to_result_value(&ListToolsResult::all(state.handler.tools()))
}

async fn handle_call_tool<H: Handler>(
    state: &Arc<McpState<H>>,
    session_id: &str,
    request: &JsonRpcMessage,
    progress: Option<ProgressSender>,
) -> Result<Value, ErrorData> {
    let params: CallToolParams = parse_params(request, "call")?;

    let arguments = params
        .arguments
        .map(Value::Object)
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let progress_token = request
        .params
        .as_ref()
        .and_then(|p| p.get("_meta"))
        .and_then(|m| serde_json::from_value::<RequestMeta>(m.clone()).ok())
        .and_then(|meta| meta.progress_token);

    let context = ToolContext {
        session_id: session_id.to_string(),
        progress_sender: progress_token.as_ref().and(progress),
        progress_token,
    };

    let tool_span = tracing::info_span!(
        "mcp.tool.call",
        mcp.tool.name = %params.name,
        mcp.session_id = %session_id,
        mcp.has_progress = %context.has_progress(),
    );

    // Track the request so notifications/cancelled can reach it.
    let cancel = request
        .id
        .clone()
        .and_then(|id| state.sessions.begin_request(session_id, id));
    let _tracked = cancel.as_ref().and(request.id.as_ref()).map(|id| InFlight {
        sessions: state.sessions.as_ref(),
        session_id,
        request_id: id,
    });

    let call = async {
        let result = state
            .handler
            .call_tool_with_context(&params.name, arguments, context)
            .await?;
        to_result_value(&result)
    }
    .instrument(tool_span);

    let outcome = match cancel {
        Some(token) => {
            tokio::select! {
                outcome = call => outcome,
                _ = token.cancelled() => {
                    tracing::info!(tool = %params.name, "Tool call cancelled by client");
                    Err(ErrorData::cancelled())
                }
            }
        }
        None => call.await,
    };

    outcome
}

/// Untracks a call when dropped, including when the transport drops the
/// call future because the client went away.
struct InFlight<'a> {
    sessions: &'a dyn SessionStore,
    session_id: &'a str,
    request_id: &'a RequestId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.sessions.finish_request(self.session_id, self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content::Content;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct TestHandler {
        slow_finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Handler for TestHandler {
        fn tools(&self) -> Vec<Tool> {
            vec![Tool::new("echo", "Echo arguments"), Tool::new("slow", "Sleeps")]
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ErrorData> {
            match name {
                "echo" => Ok(CallToolResult::text(arguments.to_string())),
                _ => Err(ErrorData::tool_not_found(name)),
            }
        }

        async fn call_tool_with_context(
            &self,
            name: &str,
            arguments: Value,
            context: ToolContext,
        ) -> Result<CallToolResult, ErrorData> {
            if name == "slow" {
                context.report(1.0, 2.0, "started").await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                self.slow_finished.store(true, Ordering::SeqCst);
                return Ok(CallToolResult::success(vec![Content::text("done")]));
            }
            self.call_tool(name, arguments).await
        }

        fn server_info(&self) -> Implementation {
            Implementation::new("test", "0.0.1")
        }

        fn instructions(&self) -> Option<String> {
            Some("be nice".to_string())
        }
    }

    fn state() -> Arc<McpState<TestHandler>> {
        Arc::new(McpState::new(TestHandler {
            slow_finished: Arc::new(AtomicBool::new(false)),
        }))
    }

    #[tokio::test]
    async fn test_initialize_marks_session() {
        let state = state();
        let session_id = state.sessions.get_or_create(None);
        let message = JsonRpcMessage::request(
            1,
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "unit", "version": "1" }
            }),
        );

        let result = dispatch(&state, &session_id, &message, None).await.unwrap();
        assert_eq!(result["serverInfo"]["name"], "test");
        assert_eq!(result["instructions"], "be nice");
        assert!(state.sessions.get(&session_id).unwrap().initialized);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let state = state();
        let message = JsonRpcMessage::request(1, "resources/list", json!({}));

        let error = dispatch(&state, "s", &message, None).await.unwrap_err();
        assert_eq!(error.code, ErrorData::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_call_tool_missing_params() {
        let state = state();
        let message = JsonRpcMessage {
            jsonrpc: Default::default(),
            id: Some(1.into()),
            method: "tools/call".to_string(),
            params: None,
        };

        let error = dispatch(&state, "s", &message, None).await.unwrap_err();
        assert_eq!(error.code, ErrorData::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_call_tool_echo() {
        let state = state();
        let session_id = state.sessions.get_or_create(None);
        let message = JsonRpcMessage::request(
            2,
            "tools/call",
            json!({ "name": "echo", "arguments": { "x": 1 } }),
        );

        let result = dispatch(&state, &session_id, &message, None).await.unwrap();
        assert_eq!(result["content"][0]["text"], r#"{"x":1}"#);
        assert_eq!(state.sessions.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_cancel_notification_stops_tool() {
        let state = state();
        let session_id = state.sessions.get_or_create(None);
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(4);

        let call = JsonRpcMessage::request(
            9,
            "tools/call",
            json!({ "name": "slow", "arguments": {}, "_meta": { "progressToken": "p" } }),
        );

        let task = {
            let state = Arc::clone(&state);
            let session_id = session_id.clone();
            tokio::spawn(async move { dispatch(&state, &session_id, &call, Some(progress_tx)).await })
        };

        // The first progress update proves the tool is running.
        let first = progress_rx.recv().await.unwrap();
        assert_eq!(first.progress_token, ProgressToken::String("p".to_string()));

        let cancel = JsonRpcMessage::notification(
            "notifications/cancelled",
            json!({ "requestId": 9, "reason": "test" }),
        );
        dispatch(&state, &session_id, &cancel, None).await.unwrap();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.unwrap_err().code, ErrorData::REQUEST_CANCELLED);
        assert!(!state.handler.slow_finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_type_mapping() {
        assert_eq!(error_type_for_code(-32602), "invalid_params");
        assert_eq!(error_type_for_code(-32000), "application_error");
    }
}
