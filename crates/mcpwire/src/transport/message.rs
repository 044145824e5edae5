//! Message Handler
//!
//! `POST /messages/?session_id=..` carries client messages for the SSE
//! transport. Requests are accepted with 202 and answered on the stream.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{progress_event, reply_event, McpState};
use crate::session::SseSender;
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, JsonRpcReply, RequestId};
use crate::types::progress::ProgressNotification;
use crate::Handler;

/// Query parameters for the message endpoint.
#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(alias = "sessionId")]
    pub session_id: String,
}

fn reject(status: StatusCode, id: Option<RequestId>, error: ErrorData) -> Response {
    (status, Json(JsonRpcReply::failure(id, error))).into_response()
}

/// Accept a JSON-RPC message for an SSE session.
///
/// Notifications are handled inline. Requests run on a spawned task that
/// races the call against the stream closing: if the client disconnects the
/// call is dropped and nothing is sent.
#[tracing::instrument(skip(state, body), fields(session_id = %params.session_id))]
pub async fn message_handler<H: Handler>(
    State(state): State<Arc<McpState<H>>>,
    Query(params): Query<MessageParams>,
    Json(body): Json<Value>,
) -> Response {
    // Clone the sender so no DashMap guard lives across an await.
    let tx: Option<SseSender> = {
        let Some(mut session) = state.sessions.get_mut(&params.session_id) else {
            return reject(
                StatusCode::NOT_FOUND,
                None,
                ErrorData::invalid_request("Session not found"),
            );
        };
        session.touch();
        session.tx.clone()
    };

    let request_id = body
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    // Replies from the client: this server never sends requests, so there is
    // nothing to correlate them with.
    if body.get("method").is_none() && (body.get("result").is_some() || body.get("error").is_some()) {
        tracing::debug!(id = ?request_id, "Ignoring client response");
        return StatusCode::ACCEPTED.into_response();
    }

    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => {
            return reject(
                StatusCode::BAD_REQUEST,
                request_id,
                ErrorData::parse_error(format!("Invalid JSON-RPC: {}", e)),
            );
        }
    };

    tracing::info!(
        method = %message.method,
        request_id = ?message.id,
        is_notification = message.is_notification(),
        "Processing MCP message"
    );

    if message.is_notification() {
        if let Err(error) =
            crate::protocol::dispatch(&state, &params.session_id, &message, None).await
        {
            tracing::debug!(error = %error, "Notification handling failed");
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let Some(tx) = tx.filter(|tx| !tx.is_closed()) else {
        return reject(
            StatusCode::CONFLICT,
            message.id,
            ErrorData::invalid_request("No open SSE stream for session"),
        );
    };

    let session_id = params.session_id;
    tokio::spawn(async move {
        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressNotification>(16);

        // Forward progress onto the stream; ends when the call drops its sender.
        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if forward_tx.send(Ok(progress_event(&progress))).await.is_err() {
                    break;
                }
            }
        });

        let outcome = tokio::select! {
            outcome = crate::protocol::dispatch(&state, &session_id, &message, Some(progress_tx)) => outcome,
            _ = tx.closed() => {
                tracing::info!(
                    session_id = %session_id,
                    method = %message.method,
                    "SSE stream closed, abandoning request"
                );
                forwarder.abort();
                return;
            }
        };

        // Progress sent before the reply must reach the client first.
        let _ = forwarder.await;

        let reply = JsonRpcReply::from_outcome(message.id.clone(), outcome);
        if let Err(e) = tx.send(Ok(reply_event(&reply))).await {
            tracing::warn!(error = ?e, "Failed to send response via SSE");
        }
    });

    StatusCode::ACCEPTED.into_response()
}
