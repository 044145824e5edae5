//! SSE Handler
//!
//! `GET /sse` opens the server-to-client stream of the SSE transport.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{McpState, MESSAGE_ENDPOINT, SESSION_HEADER};
use crate::Handler;

/// Query parameters for the SSE endpoint.
#[derive(Debug, Deserialize)]
pub struct SseParams {
    /// Session to resume.
    #[serde(alias = "sessionId")]
    pub session_id: Option<String>,
}

/// Open an SSE stream.
///
/// Creates or resumes the session, announces the POST endpoint, then relays
/// replies and progress notifications until the client goes away. Dropping
/// the stream closes the channel, which abandons any calls still running
/// for this session.
#[tracing::instrument(skip_all, fields(session_id = tracing::field::Empty))]
pub async fn sse_handler<H: Handler>(
    State(state): State<Arc<McpState<H>>>,
    Query(params): Query<SseParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id_hint = params.session_id.or_else(|| {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    let session_id = state.sessions.get_or_create(session_id_hint.as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());

    let (tx, rx) = mpsc::channel::<Result<Event, axum::Error>>(32);
    state.sessions.register_sse(&session_id, tx.clone());

    let endpoint = format!("{}?session_id={}", MESSAGE_ENDPOINT, session_id);
    if tx
        .send(Ok(Event::default().event("endpoint").data(endpoint)))
        .await
        .is_err()
    {
        tracing::warn!("Failed to send initial endpoint event");
    }

    tracing::info!(session_id = %session_id, "SSE connection established");

    let stream = ReceiverStream::new(rx).map(|result| match result {
        Ok(event) => Ok(event),
        Err(_) => Ok(Event::default().data("error")),
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
