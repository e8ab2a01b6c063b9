//! Upload Routes
//!
//! HTTP endpoints for batch uploads and progress queries.
//!
//! Endpoints:
//! - POST /upload/ - Upload one or more multipart `files` fields
//! - GET /upload/progress/*filename - Progress of one in-flight upload
//! - GET /upload/all-progress - Progress of every in-flight upload

use std::collections::HashMap;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::state::AppState;
use crate::upload::{UploadError, UploadOptions, UploadReport};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Upload request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(state: &AppState) -> Router<AppState> {
    let body_limit = match state.config().upload.max_request_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/upload", post(upload_files))
        .route("/upload/", post(upload_files))
        .route("/upload/progress/*filename", get(get_progress))
        .route("/upload/all-progress", get(all_progress))
        .layer(body_limit)
}

// ============================================================================
// Batch Upload
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub chunk_size: Option<usize>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Completed,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchUploadResponse {
    pub message: String,
    pub results: Vec<FileResult>,
}

/// POST /upload/
///
/// Spool every `files` field to a temp file, then upload each in its own
/// task. A malformed part rejects the batch before any upload starts.
/// Responds once every upload has finished; one file failing does not
/// affect the others.
async fn upload_files(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, UploadError> {
    let options = state.upload_options(params.chunk_size, params.max_retries);
    if options.chunk_size == 0 {
        return Err(UploadError::InvalidChunkSize);
    }

    // Dropping a TempPath on an early return removes the spooled file
    let mut spooled = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("files") {
            continue;
        }

        let filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(UploadError::BadRequest("File part without a filename".to_string())),
        };

        let temp = spool_field(field).await?;
        tracing::debug!(filename = %filename, path = %temp.display(), "Spooled upload to temp file");
        spooled.push((filename, temp));
    }

    if spooled.is_empty() {
        return Err(UploadError::BadRequest("No files provided".to_string()));
    }

    let tasks: Vec<_> = spooled
        .into_iter()
        .map(|(filename, temp)| {
            let engine = state.engine().clone();
            let task = tokio::spawn(upload_spooled(engine, temp, filename.clone(), options));
            (filename, task)
        })
        .collect();

    let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let outcomes = futures::future::join_all(handles).await;

    let results = names
        .into_iter()
        .zip(outcomes)
        .map(|(filename, outcome)| match outcome {
            Ok(Ok(_)) => FileResult {
                filename,
                status: FileStatus::Completed,
                error: None,
            },
            Ok(Err(e)) => FileResult {
                filename,
                status: FileStatus::Failed,
                error: Some(e.to_string()),
            },
            Err(join_err) => {
                tracing::error!(filename = %filename, error = %join_err, "Upload task panicked");
                FileResult {
                    filename,
                    status: FileStatus::Failed,
                    error: Some("Upload task aborted".to_string()),
                }
            }
        })
        .collect();

    Ok(Json(BatchUploadResponse {
        message: "Upload process completed for all files".to_string(),
        results,
    }))
}

/// Upload one spooled file; the temp file is removed when this returns
async fn upload_spooled(
    engine: crate::upload::UploadEngine,
    temp: TempPath,
    filename: String,
    options: UploadOptions,
) -> Result<UploadReport, UploadError> {
    let result = engine.upload_stream(&temp, &filename, options).await;

    if let Err(e) = temp.close() {
        tracing::warn!(filename = %filename, error = %e, "Failed to remove temp file");
    }

    result
}

/// Copy a multipart field to a fresh temp file
async fn spool_field(mut field: Field<'_>) -> Result<TempPath, UploadError> {
    let temp = tempfile::Builder::new()
        .prefix("blocklift-")
        .tempfile()?
        .into_temp_path();

    let mut file = tokio::fs::File::create(&temp).await?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::BadRequest(e.body_text()))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(temp)
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Serialize)]
struct ProgressResponse {
    filename: String,
    progress: String,
}

/// GET /upload/progress/*filename
async fn get_progress(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<ProgressResponse>, UploadError> {
    let progress = state
        .engine()
        .get_progress(&filename)
        .ok_or_else(|| UploadError::NotFound(filename.clone()))?;

    Ok(Json(ProgressResponse {
        progress: format!("{:.2}%", progress),
        filename,
    }))
}

/// GET /upload/all-progress
async fn all_progress(State(state): State<AppState>) -> Json<HashMap<String, f64>> {
    Json(state.engine().all_progress())
}
