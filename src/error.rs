//! Error taxonomy for backend fetches and view-model operations.

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

// ---

#[derive(Error, Debug)]
pub enum TelemetryError {
    /// No response was received (connection refused, timeout, TLS...).
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response arrived with a non-success status.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("unexpected payload from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("page size must be positive, got {0}")]
    InvalidPageSize(usize),

    #[error("page index {0} has no backend page")]
    InvalidPageIndex(usize),

    #[error("invalid backend url: {0}")]
    InvalidBaseUrl(String),

    #[error("session cookie is not a valid header value")]
    InvalidSessionCookie,
}

impl TelemetryError {
    /// Build a status error from a response body, preferring the backend's
    /// `message` field, then `detail`, then a generic fallback.
    pub fn from_status(status: u16, body: &str) -> Self {
        // ---
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                ["message", "detail"]
                    .iter()
                    .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_owned))
            })
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("request failed with status {status}"));

        TelemetryError::Status { status, message }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TelemetryError::Status { status: 404, .. })
    }
}

/// Which fetch produced a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSide {
    Devices,
    Readings,
    Both,
    Lookup,
}

/// Transient error exposed to the view layer; expires after the configured TTL.
#[derive(Debug, Clone, Serialize)]
pub struct ViewError {
    pub message: String,
    pub side: ErrorSide,
    #[serde(skip)]
    pub at: Instant,
}

impl ViewError {
    pub fn new(side: ErrorSide, message: impl Into<String>) -> Self {
        ViewError {
            message: message.into(),
            side,
            at: Instant::now(),
        }
    }
}
