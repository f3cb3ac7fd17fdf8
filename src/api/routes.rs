//! REST endpoints for uploads, progress polling, downloads, and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::error::ApiError;
use crate::tasks::model::TaskId;
use crate::tasks::service::TaskService;

/// Multipart field carrying the upload.
const UPLOAD_FIELD: &str = "file";

/// Bytes escaped in an RFC 5987 `filename*` value: everything except `attr-char`.
const ATTR_CHAR_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
}

/// Build the Axum router for the conversion API.
pub fn api_routes(service: Arc<TaskService>, cors_origins: Option<&str>) -> Router {
    let state = AppState { service };

    Router::new()
        .route(
            "/api/convert",
            // Size is enforced while streaming, not by a buffered limit.
            post(convert).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/progress/{task_id}", get(progress))
        .route("/api/download/{task_id}", get(download))
        .route("/api/health", get(health))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Any origin unless a comma-separated allow list is given.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if allowed.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(allowed)
    }
}

/// Unknown and malformed ids both read as "no such task".
fn parse_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn convert(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        let filename = field.file_name().map(str::to_owned);
        let task_id = state.service.submit(filename.as_deref(), field).await?;
        return Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))).into_response());
    }

    Err(ApiError::BadRequest(format!(
        "missing \"{UPLOAD_FIELD}\" field"
    )))
}

async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let report = state.service.progress(parse_id(&task_id)?).await?;
    Ok(Json(report).into_response())
}

async fn download(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let dl = state.service.download(parse_id(&task_id)?).await?;

    // The sweeper may have won the race since the status check.
    let file = tokio::fs::File::open(&dl.path)
        .await
        .map_err(|_| ApiError::ConversionFailed("Output not found.".to_string()))?;
    let length = file.metadata().await?.len();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(dl.content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(disposition) = HeaderValue::from_str(&content_disposition(&dl.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.health())
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let encoded = utf8_percent_encode(filename, ATTR_CHAR_ESCAPES);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
