//! Streamable HTTP Transport
//!
//! - `POST /mcp` answers inline: JSON, or an event stream for `tools/call`
//!   when the client accepts `text/event-stream`
//! - `DELETE /mcp` ends the session
//! - Session id via the `Mcp-Session-Id` header

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{progress_event, reply_event, McpState};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, JsonRpcReply, RequestId};
use crate::types::progress::ProgressNotification;
use crate::Handler;

pub const SESSION_HEADER: &str = "mcp-session-id";

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Handle a Streamable HTTP POST.
///
/// Notifications get 202. `tools/call` from a client that accepts
/// `text/event-stream` is answered as a stream carrying progress and then the
/// reply; dropping that stream drops the call. Everything else is plain JSON.
#[tracing::instrument(skip(state, headers, body), fields(session_id = tracing::field::Empty))]
pub async fn streamable_handler<H: Handler>(
    State(state): State<Arc<McpState<H>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let session_id_hint = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let session_id = state.sessions.get_or_create(session_id_hint.as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());
    state.sessions.touch(&session_id);

    let request_id = body
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => {
            let reply = JsonRpcReply::failure(
                request_id,
                ErrorData::parse_error(format!("Invalid JSON-RPC: {}", e)),
            );
            return build_response(StatusCode::BAD_REQUEST, &session_id, Json(reply));
        }
    };

    if message.is_notification() {
        tracing::info!(method = %message.method, "Processing MCP notification (streamable)");
        if let Err(error) = crate::protocol::dispatch(&state, &session_id, &message, None).await {
            tracing::debug!(error = %error, "Notification handling failed");
        }
        return build_response(StatusCode::ACCEPTED, &session_id, ());
    }

    tracing::info!(
        method = %message.method,
        request_id = ?message.id,
        "Processing MCP request (streamable)"
    );

    if message.method == "tools/call" && accepts_event_stream(&headers) {
        let stream = call_stream(Arc::clone(&state), session_id.clone(), message);
        let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
        return build_response(StatusCode::OK, &session_id, sse);
    }

    let outcome = crate::protocol::dispatch(&state, &session_id, &message, None).await;
    let reply = JsonRpcReply::from_outcome(message.id.clone(), outcome);

    build_response(StatusCode::OK, &session_id, Json(reply))
}

enum Step {
    Progress(ProgressNotification),
    Done(Result<Value, ErrorData>),
}

/// Run one call, yielding progress events and finally the reply.
fn call_stream<H: Handler>(
    state: Arc<McpState<H>>,
    session_id: String,
    message: JsonRpcMessage,
) -> impl futures::Stream<Item = Result<axum::response::sse::Event, Infallible>> {
    async_stream::stream! {
        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressNotification>(16);
        let mut call = Box::pin(crate::protocol::dispatch(
            &state,
            &session_id,
            &message,
            Some(progress_tx),
        ));

        loop {
            let step = tokio::select! {
                outcome = &mut call => Step::Done(outcome),
                Some(progress) = progress_rx.recv() => Step::Progress(progress),
            };

            match step {
                Step::Progress(progress) => yield Ok(progress_event(&progress)),
                Step::Done(outcome) => {
                    while let Ok(progress) = progress_rx.try_recv() {
                        yield Ok(progress_event(&progress));
                    }
                    let reply = JsonRpcReply::from_outcome(message.id.clone(), outcome);
                    yield Ok(reply_event(&reply));
                    break;
                }
            }
        }
    }
}

/// Attach the session id header to any response.
fn build_response<T: IntoResponse>(status: StatusCode, session_id: &str, body: T) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;

    if let Ok(header_value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, header_value);
    }

    response
}

/// Handle DELETE requests (session termination).
#[tracing::instrument(skip(state, headers), fields(session_id = tracing::field::Empty))]
pub async fn delete_handler<H: Handler>(
    State(state): State<Arc<McpState<H>>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response();
    };

    tracing::Span::current().record("session_id", session_id);

    if state.sessions.remove(session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
