//! Block store error types
//!
//! HTTP-facing failures are [`crate::upload::UploadError`]; this module only
//! covers the storage backends it wraps.

use thiserror::Error;

/// Block store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Staged block not found: {target}/{block_id}")]
    BlockNotFound { target: String, block_id: String },

    #[error("Object too large to commit: {target} ({size} bytes)")]
    ObjectTooLarge { target: String, size: u64 },

    #[error("Invalid target name: {0}")]
    InvalidTarget(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_not_found_names_target_and_block() {
        let err = StorageError::BlockNotFound {
            target: "videos/a.mp4".to_string(),
            block_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Staged block not found: videos/a.mp4/abc");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(err.to_string().starts_with("IO error"));
    }
}
