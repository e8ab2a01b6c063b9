//! Upload types for the block upload engine

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use super::resume::ResumeError;

// ============================================================================
// Constants
// ============================================================================

/// Default chunk (block) size: 4MB
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default number of retries per block before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum file size: 100GB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024 * 1024;

// ============================================================================
// Options
// ============================================================================

/// Per-call upload parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    /// Bytes read and staged per block
    pub chunk_size: usize,

    /// Retries allowed for a single block after its first failed attempt
    pub max_retries: u32,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// ============================================================================
// Session Types
// ============================================================================

/// State of one in-flight file upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Destination object name
    pub target_name: String,

    /// Size of the source file, fixed when the session starts
    pub total_size: u64,

    /// Bytes successfully staged so far (including resumed bytes)
    pub uploaded_size: u64,

    /// Staged block ids in object byte order
    pub block_ids: Vec<String>,

    /// Failed attempts for the block currently being staged
    pub retry_count: u32,

    /// Offset the session resumed from (0 for a fresh upload)
    pub resumed_from: u64,
}

impl UploadSession {
    /// Create a session starting from an empty block list
    pub fn new(target_name: impl Into<String>, total_size: u64) -> Self {
        Self {
            target_name: target_name.into(),
            total_size,
            uploaded_size: 0,
            block_ids: Vec::new(),
            retry_count: 0,
            resumed_from: 0,
        }
    }

    /// Create a session continuing from previously staged blocks
    pub fn resumed(
        target_name: impl Into<String>,
        total_size: u64,
        uploaded_size: u64,
        block_ids: Vec<String>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            total_size,
            uploaded_size,
            block_ids,
            retry_count: 0,
            resumed_from: uploaded_size,
        }
    }

    /// Record a successfully staged block
    pub fn record_block(&mut self, block_id: String, len: usize) {
        self.block_ids.push(block_id);
        self.uploaded_size += len as u64;
        self.retry_count = 0;
    }

    /// Bytes still to be read from the source
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.uploaded_size)
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        (self.uploaded_size as f64 / self.total_size as f64) * 100.0
    }
}

/// Result of a completed upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub target_name: String,
    pub total_size: u64,
    pub block_count: usize,
    pub blocks_staged: usize,
    pub resumed_from: u64,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Failed to stage block for {target} after {attempts} attempts: {source}")]
    Stage {
        target: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Failed to commit block list for {target}: {source}")]
    Commit {
        target: String,
        #[source]
        source: StorageError,
    },

    #[error("Resume state error: {0}")]
    ResumeState(#[from] ResumeError),

    #[error("Source for {target} ended at {actual} bytes (expected {expected})")]
    SourceTruncated {
        target: String,
        expected: u64,
        actual: u64,
    },

    #[error("Upload already in progress: {0}")]
    UploadInProgress(String),

    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InternalError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidChunkSize => StatusCode::BAD_REQUEST,
            Self::Stage { .. } => StatusCode::BAD_GATEWAY,
            Self::Commit { .. } => StatusCode::BAD_GATEWAY,
            Self::ResumeState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SourceTruncated { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UploadInProgress(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::InvalidChunkSize => "INVALID_CHUNK_SIZE",
            Self::Stage { .. } => "STAGE_FAILED",
            Self::Commit { .. } => "COMMIT_FAILED",
            Self::ResumeState(_) => "RESUME_STATE_ERROR",
            Self::SourceTruncated { .. } => "SOURCE_TRUNCATED",
            Self::UploadInProgress(_) => "UPLOAD_IN_PROGRESS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Io(_) => "IO_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}
