//! Task lifecycle API — create, submit, query, fetch, health.
//!
//! Request handlers call into this; it validates preconditions and turns task
//! state into results or [`ApiError`]s. Nothing here knows about HTTP.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::model::{ProgressReport, TaskId, TaskStatus, TaskUpdate};
use super::runner::ConversionRunner;
use super::store::TaskStore;
use crate::config::ServiceConfig;
use crate::converter::Converter;
use crate::error::ApiError;

/// Accepted upload suffix (case-insensitive).
pub const ACCEPTED_EXTENSION: &str = ".epub";

/// Used when the client sends no filename.
pub const DEFAULT_FILENAME: &str = "upload.epub";

/// Name of the uploaded file inside the task directory.
pub const INPUT_FILENAME: &str = "input.epub";

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A finished conversion ready to stream back.
#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    /// Name the client should save the file as.
    pub filename: String,
    pub content_type: &'static str,
}

/// Service health as reported by `/api/health`.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub ok: bool,
    pub converter_path: String,
    pub temp_dir: String,
}

/// Operations surface over the task store and the conversion runner.
pub struct TaskService {
    store: Arc<TaskStore>,
    runner: ConversionRunner,
    temp_root: PathBuf,
    max_upload_bytes: u64,
}

impl TaskService {
    pub fn new(config: &ServiceConfig, store: Arc<TaskStore>, converter: Converter) -> Self {
        let runner = ConversionRunner::new(Arc::clone(&store), converter, config.download_ttl)
            .with_timeout(config.conversion_timeout);
        Self {
            store,
            runner,
            temp_root: config.temp_root.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Directory owned by task `id`.
    pub fn task_dir(&self, id: TaskId) -> PathBuf {
        self.temp_root.join(id.to_string())
    }

    /// Create a processing task and its private directory.
    pub async fn create(&self, filename: &str) -> Result<TaskId, ApiError> {
        let id = self.store.create(filename).await;
        if let Err(e) = tokio::fs::create_dir_all(self.task_dir(id)).await {
            self.store.remove(id).await;
            return Err(e.into());
        }
        Ok(id)
    }

    /// Validate an upload, stream it to disk, and hand it to the runner.
    ///
    /// Returns as soon as the upload is stored; conversion continues in the
    /// background. A rejected upload leaves neither a task nor files behind.
    pub async fn submit<S, E>(&self, filename: Option<&str>, body: S) -> Result<TaskId, ApiError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let filename = filename
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME);
        if !filename.to_lowercase().ends_with(ACCEPTED_EXTENSION) {
            info!(filename, "Upload rejected: unsupported type");
            return Err(ApiError::UnsupportedType);
        }

        if !self.runner.converter().is_available() {
            warn!(path = %self.runner.converter().path().display(), "Upload rejected: converter missing");
            return Err(ApiError::ConverterMissing);
        }

        let id = self.create(filename).await?;
        let dir = self.task_dir(id);
        let input = dir.join(INPUT_FILENAME);
        let output = dir.join(output_filename(filename));

        match self.write_upload(body, &input).await {
            Ok(size) => info!(task_id = %id, bytes = size, "Upload stored"),
            Err(e) => {
                info!(task_id = %id, kind = e.kind(), "Upload aborted");
                self.discard(id).await;
                return Err(e);
            }
        }

        self.store
            .update(id, TaskUpdate::queued(input.clone(), output.clone()))
            .await;
        self.runner.dispatch(id, input, output);

        Ok(id)
    }

    /// Stream `body` into `path`, enforcing the size limit before each write.
    async fn write_upload<S, E>(&self, body: S, path: &Path) -> Result<u64, ApiError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut body = std::pin::pin!(body);
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ApiError::BadRequest(e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.max_upload_bytes {
                return Err(ApiError::TooLarge {
                    max_bytes: self.max_upload_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(written)
    }

    /// Drop a task that never made it to the runner, files included.
    async fn discard(&self, id: TaskId) {
        let dir = self.task_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(task_id = %id, error = %e, "Failed to remove rejected upload"),
        }
        self.store.remove(id).await;
    }

    /// Current progress of a task.
    pub async fn progress(&self, id: TaskId) -> Result<ProgressReport, ApiError> {
        self.progress_at(id, Utc::now()).await
    }

    pub async fn progress_at(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<ProgressReport, ApiError> {
        let task = self.store.get(id).await.ok_or(ApiError::NotFound)?;
        Ok(ProgressReport::at(&task, now))
    }

    /// Locate the finished output of a task.
    pub async fn download(&self, id: TaskId) -> Result<Download, ApiError> {
        self.download_at(id, Utc::now()).await
    }

    pub async fn download_at(&self, id: TaskId, now: DateTime<Utc>) -> Result<Download, ApiError> {
        let task = self.store.get(id).await.ok_or(ApiError::NotFound)?;
        if task.status != TaskStatus::Complete {
            return Err(ApiError::NotReady);
        }
        if task.is_expired_at(now) {
            return Err(ApiError::Expired);
        }

        let path = task
            .output_path
            .filter(|p| p.is_file())
            .ok_or_else(|| ApiError::ConversionFailed("Output not found.".to_string()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| output_filename(&task.filename));

        Ok(Download {
            path,
            filename,
            content_type: PDF_CONTENT_TYPE,
        })
    }

    pub fn health(&self) -> Health {
        let converter = self.runner.converter();
        Health {
            ok: converter.is_available(),
            converter_path: converter.path().display().to_string(),
            temp_dir: self.temp_root.display().to_string(),
        }
    }
}

/// Deliverable name: the upload's base name with a `.pdf` extension.
pub fn output_filename(upload: &str) -> String {
    let base = upload.rsplit(['/', '\\']).next().unwrap_or(upload);
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
    if stem.trim().is_empty() {
        "output.pdf".to_string()
    } else {
        format!("{stem}.pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_filename_swaps_extension() {
        assert_eq!(output_filename("book.epub"), "book.pdf");
        assert_eq!(output_filename("My.Great.Book.EPUB"), "My.Great.Book.pdf");
    }

    #[test]
    fn output_filename_strips_directories() {
        assert_eq!(output_filename("/tmp/evil/../book.epub"), "book.pdf");
        assert_eq!(output_filename("C:\\Users\\me\\novel.epub"), "novel.pdf");
    }

    #[test]
    fn output_filename_falls_back_when_stem_empty() {
        assert_eq!(output_filename(".epub"), "output.pdf");
    }
}
