//! Error types for the conversion service.
//!
//! `ApiError` is what request handlers return; it renders as a JSON body with a
//! stable machine-readable `kind`. `RunnerError` never leaves the background
//! runner: it is recorded on the task instead.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 425 Too Early: the result exists but is not ready yet.
const TOO_EARLY: u16 = 425;

/// Errors surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unsupported file type. Only .epub is allowed.")]
    UnsupportedType,

    #[error("File too large. Max {}.", upload_limit(*max_bytes))]
    TooLarge { max_bytes: u64 },

    #[error("Conversion failed. {0}")]
    ConversionFailed(String),

    #[error("Task not found.")]
    NotFound,

    #[error("File has expired.")]
    Expired,

    #[error("Calibre 'ebook-convert' not found on server. Install calibre to provide 'ebook-convert'.")]
    ConverterMissing,

    #[error("Not ready.")]
    NotReady,

    #[error("Malformed upload: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedType => "UNSUPPORTED_TYPE",
            Self::TooLarge { .. } => "TOO_LARGE",
            Self::ConversionFailed(_) => "CONVERSION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Expired => "EXPIRED",
            Self::ConverterMissing => "CALIBRE_MISSING",
            Self::NotReady => "NOT_READY",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Expired => StatusCode::GONE,
            Self::NotReady => {
                StatusCode::from_u16(TOO_EARLY).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ConversionFailed(_) | Self::ConverterMissing | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Human-readable upload limit: whole MB when exact, else KB or bytes.
fn upload_limit(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KB", bytes / KIB)
    } else {
        format!("{bytes} bytes")
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Filesystem details stay in the logs.
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "Internal server error");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(json!({
                "error": message,
                "kind": self.kind(),
                "code": status.as_u16(),
            })),
        )
            .into_response()
    }
}

/// Failures inside the conversion runner. Always downgraded to a task `error` state.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start converter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("converter timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("runner panicked: {0}")]
    Panicked(String),
}
