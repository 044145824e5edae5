//! Auth Gate
//!
//! Shared-secret authentication for every request except `GET`/`HEAD /health`.
//! Runs as an axum middleware in front of the MCP router, so a rejected
//! request never reaches dispatch.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::dependency::SecretString;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The only path reachable without a credential, and only for reads.
pub const HEALTH_PATH: &str = "/health";

/// Credentials longer than this are rejected without comparison.
pub const MAX_CREDENTIAL_BYTES: usize = 8 * 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("no API key presented")]
    Missing,

    #[error("invalid API key")]
    Invalid,

    #[error("API key header too large")]
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// The request needs no credential.
    Exempt,
    Rejected(AuthError),
}

/// Per-request authentication result. Holds a fingerprint of the presented
/// credential, never the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub presented: bool,
    pub fingerprint: Option<String>,
    pub outcome: AuthOutcome,
}

impl AuthContext {
    pub fn is_allowed(&self) -> bool {
        !matches!(self.outcome, AuthOutcome::Rejected(_))
    }
}

fn fingerprint(credential: &[u8]) -> String {
    let hex = blake3::hash(credential).to_hex();
    hex.as_str()[..12].to_string()
}

pub struct AuthGate {
    expected: SecretString,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("expected", &"[redacted]")
            .finish()
    }
}

impl AuthGate {
    pub fn new(expected: SecretString) -> Self {
        Self { expected }
    }

    /// Health reads skip the gate; any other method on the same path does not.
    pub fn is_exempt(method: &Method, path: &str) -> bool {
        path == HEALTH_PATH && (method == Method::GET || method == Method::HEAD)
    }

    /// Judge one request. `presented` is the raw header value, if any.
    pub fn judge(&self, method: &Method, path: &str, presented: Option<&[u8]>) -> AuthContext {
        if Self::is_exempt(method, path) {
            return AuthContext {
                presented: presented.is_some(),
                fingerprint: None,
                outcome: AuthOutcome::Exempt,
            };
        }

        let Some(credential) = presented else {
            return AuthContext {
                presented: false,
                fingerprint: None,
                outcome: AuthOutcome::Rejected(AuthError::Missing),
            };
        };

        if credential.len() > MAX_CREDENTIAL_BYTES {
            return AuthContext {
                presented: true,
                fingerprint: None,
                outcome: AuthOutcome::Rejected(AuthError::Oversized),
            };
        }

        // Equal-length digests keep the comparison independent of key length.
        let expected = blake3::hash(self.expected.expose().as_bytes());
        let actual = blake3::hash(credential);
        let matches: bool = actual.as_bytes().ct_eq(expected.as_bytes()).into();

        AuthContext {
            presented: true,
            fingerprint: Some(fingerprint(credential)),
            outcome: if matches {
                AuthOutcome::Authenticated
            } else {
                AuthOutcome::Rejected(AuthError::Invalid)
            },
        }
    }

    pub fn judge_headers(&self, method: &Method, path: &str, headers: &HeaderMap) -> AuthContext {
        let presented = headers.get(API_KEY_HEADER).map(|v| v.as_bytes());
        self.judge(method, path, presented)
    }
}

/// axum middleware: `middleware::from_fn_with_state(gate, require_api_key)`.
///
/// On success the [`AuthContext`] is added to the request extensions.
pub async fn require_api_key(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let context = gate.judge_headers(request.method(), &path, request.headers());

    match context.outcome {
        AuthOutcome::Rejected(reason) => {
            tracing::warn!(
                path = %path,
                method = %request.method(),
                reason = %reason,
                fingerprint = context.fingerprint.as_deref().unwrap_or("-"),
                "Rejected unauthenticated request"
            );
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response()
        }
        _ => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
    }
}
