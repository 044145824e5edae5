//! Progress notifications (`notifications/progress`).
//!
//! A client opts in by putting `_meta.progressToken` on a `tools/call`
//! request; the server then echoes that token on every update it sends.

use serde::{Deserialize, Serialize};

/// Parameters of a `notifications/progress` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    /// Token from the originating request's `_meta.progressToken`.
    pub progress_token: ProgressToken,

    /// Absolute progress when `total` is set, otherwise a 0.0..=1.0 fraction.
    pub progress: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressNotification {
    /// Progress as a fraction between 0.0 and 1.0.
    pub fn normalized(token: ProgressToken, progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress_token: token,
            progress,
            total: None,
            message: Some(message.into()),
        }
    }

    /// Progress as `progress` out of `total`.
    pub fn absolute(
        token: ProgressToken,
        progress: f64,
        total: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            progress_token: token,
            progress,
            total: Some(total),
            message: Some(message.into()),
        }
    }
}

/// Progress token; MCP allows either a string or an integer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Integer(i64),
}

impl std::fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressToken::String(s) => write!(f, "{}", s),
            ProgressToken::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// The reserved `_meta` object of a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,
}
