//! Session Store
//!
//! Trait and in-memory implementation for session storage.
//!
//! Lifecycle spans:
//! - `mcp.session.create` - creation (new or resumed)
//! - `mcp.session.expire` - idle cleanup
//! - `mcp.session.terminate` - explicit termination

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Session, SessionRef, SessionRefMut, SseSender};
use crate::types::jsonrpc::RequestId;
use crate::types::protocol::Implementation;

/// Statistics about active sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionStats {
    pub total: usize,
    /// Sessions with an open SSE stream.
    pub connected: usize,
    pub disconnected: usize,
    /// Tool calls currently executing across all sessions.
    pub in_flight: usize,
}

/// Session store trait for pluggable storage backends.
pub trait SessionStore: Send + Sync {
    /// Get an existing session or create one.
    ///
    /// A hint that names an unknown session creates it under that id; no hint
    /// generates a UUID.
    fn get_or_create(&self, id_hint: Option<&str>) -> String;

    fn get(&self, id: &str) -> Option<SessionRef<'_>>;

    fn get_mut(&self, id: &str) -> Option<SessionRefMut<'_>>;

    fn touch(&self, id: &str);

    fn set_initialized(&self, id: &str, client_info: Implementation);

    fn register_sse(&self, id: &str, tx: SseSender);

    /// Track an in-flight request. `None` if the session is gone.
    fn begin_request(&self, id: &str, request_id: RequestId) -> Option<CancellationToken>;

    fn finish_request(&self, id: &str, request_id: &RequestId);

    /// Cancel an in-flight request. Returns false if nothing was running.
    fn cancel_request(&self, id: &str, request_id: &RequestId) -> bool;

    /// Remove idle sessions. Returns the number removed.
    fn cleanup(&self, max_idle: Duration) -> usize;

    /// Remove a session, cancelling anything it still has in flight.
    fn remove(&self, id: &str) -> bool;

    fn stats(&self) -> SessionStats;
}

/// In-memory session store using DashMap.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, id_hint: Option<&str>) -> String {
        let (id, is_new) = match id_hint {
            Some(hint) => {
                let mut is_new = false;
                self.sessions.entry(hint.to_string()).or_insert_with(|| {
                    is_new = true;
                    Session::new(hint.to_string())
                });
                (hint.to_string(), is_new)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                self.sessions.insert(id.clone(), Session::new(id.clone()));
                (id, true)
            }
        };

        let _span = tracing::info_span!(
            "mcp.session.create",
            mcp.session_id = %id,
            mcp.session.is_new = is_new,
        )
        .entered();

        if is_new {
            tracing::info!("Created new session");
        } else {
            tracing::debug!("Resumed existing session");
        }

        id
    }

    fn get(&self, id: &str) -> Option<SessionRef<'_>> {
        self.sessions.get(id)
    }

    fn get_mut(&self, id: &str) -> Option<SessionRefMut<'_>> {
        self.sessions.get_mut(id)
    }

    fn touch(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.touch();
        }
    }

    fn set_initialized(&self, id: &str, client_info: Implementation) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            tracing::info!(
                session_id = %id,
                client_name = %client_info.name,
                client_version = %client_info.version,
                "Session initialized"
            );
            session.set_initialized(client_info);
        }
    }

    fn register_sse(&self, id: &str, tx: SseSender) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.register_sse(tx);
            tracing::info!(session_id = %id, "Registered SSE connection");
        }
    }

    fn begin_request(&self, id: &str, request_id: RequestId) -> Option<CancellationToken> {
        self.sessions
            .get_mut(id)
            .map(|mut session| session.begin_request(request_id))
    }

    fn finish_request(&self, id: &str, request_id: &RequestId) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.finish_request(request_id);
        }
    }

    fn cancel_request(&self, id: &str, request_id: &RequestId) -> bool {
        self.sessions
            .get_mut(id)
            .map(|mut session| session.cancel_request(request_id))
            .unwrap_or(false)
    }

    fn cleanup(&self, max_idle: Duration) -> usize {
        let mut to_remove = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();

            // Sessions with an open stream or running calls get the full TTL.
            let effective_ttl = if session.is_connected() || session.in_flight() > 0 {
                max_idle
            } else {
                max_idle / 6
            };

            if session.idle_duration() > effective_ttl {
                to_remove.push(entry.key().clone());
            }
        }

        let removed = to_remove.len();
        for id in to_remove {
            if let Some((_, mut session)) = self.sessions.remove(&id) {
                let _span = tracing::info_span!("mcp.session.expire", mcp.session_id = %id).entered();
                session.cancel_all();
                tracing::info!("Removed stale session");
            }
        }

        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = self.sessions.len(),
                "Session cleanup completed"
            );
        }

        removed
    }

    fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, mut session)) => {
                let _span =
                    tracing::info_span!("mcp.session.terminate", mcp.session_id = %id).entered();
                session.cancel_all();
                tracing::info!("Session removed");
                true
            }
            None => false,
        }
    }

    fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            total: self.sessions.len(),
            ..Default::default()
        };

        for entry in self.sessions.iter() {
            if entry.value().is_connected() {
                stats.connected += 1;
            } else {
                stats.disconnected += 1;
            }
            stats.in_flight += entry.value().in_flight();
        }

        stats
    }
}

/// Spawn a background task that periodically cleans up stale sessions.
pub fn spawn_cleanup_task(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    max_idle: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Session cleanup task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    store.cleanup(max_idle);
                }
            }
        }
    })
}
