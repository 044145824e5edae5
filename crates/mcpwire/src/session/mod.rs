//! Session Management
//!
//! Session lifecycle for both transports: creation, resumption, in-flight
//! request tracking for cancellation, and idle cleanup.

mod store;

pub use store::{spawn_cleanup_task, InMemorySessionStore, SessionStats, SessionStore};

use axum::response::sse::Event;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::jsonrpc::RequestId;
use crate::types::protocol::Implementation;

/// SSE event sender type alias.
pub type SseSender = mpsc::Sender<Result<Event, axum::Error>>;

/// A reference to a session (from DashMap).
pub type SessionRef<'a> = dashmap::mapref::one::Ref<'a, String, Session>;

/// A mutable reference to a session (from DashMap).
pub type SessionRefMut<'a> = dashmap::mapref::one::RefMut<'a, String, Session>;

/// An MCP session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    pub last_seen: Instant,

    /// Client implementation info (set after initialize).
    pub client_info: Option<Implementation>,
    pub initialized: bool,

    /// SSE channel sender (None until `GET /sse` attaches one).
    pub tx: Option<SseSender>,

    /// Requests currently executing, keyed by JSON-RPC id.
    in_flight: HashMap<RequestId, CancellationToken>,
}

impl Session {
    pub fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_seen: now,
            client_info: None,
            initialized: false,
            tx: None,
            in_flight: HashMap::new(),
        }
    }

    /// Whether an SSE stream is attached and still open.
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn set_initialized(&mut self, client_info: Implementation) {
        self.initialized = true;
        self.client_info = Some(client_info);
        self.touch();
    }

    pub fn register_sse(&mut self, tx: SseSender) {
        self.tx = Some(tx);
        self.touch();
    }

    /// Start tracking a request; the returned token fires on cancellation.
    ///
    /// A client reusing an id replaces the earlier token, which is cancelled.
    pub fn begin_request(&mut self, request_id: RequestId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.in_flight.insert(request_id, token.clone()) {
            previous.cancel();
        }
        token
    }

    pub fn finish_request(&mut self, request_id: &RequestId) {
        self.in_flight.remove(request_id);
    }

    /// Cancel a tracked request. Returns false if it was not in flight.
    pub fn cancel_request(&mut self, request_id: &RequestId) -> bool {
        match self.in_flight.remove(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Cancel everything still running (session teardown).
    pub fn cancel_all(&mut self) {
        for (_, token) in self.in_flight.drain() {
            token.cancel();
        }
    }

    /// Send an SSE event to the client.
    pub async fn send_event(&self, event: Event) -> Result<(), SendError> {
        match &self.tx {
            Some(tx) => tx.send(Ok(event)).await.map_err(|_| SendError::ChannelClosed),
            None => Err(SendError::NotConnected),
        }
    }
}

/// Error when sending an SSE event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("session has no SSE connection")]
    NotConnected,
    #[error("SSE channel is closed")]
    ChannelClosed,
}
