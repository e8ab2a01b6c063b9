//! Application state management

use std::sync::Arc;

use crate::config::{Config, ResumeConfig, StorageConfig};
use crate::error::StorageError;
use crate::storage::{BlockStore, LocalBlockStore, S3Client};
use crate::upload::{
    FileResumeStore, ProgressRegistry, ResumeStore, SqliteResumeStore, UploadEngine, UploadOptions,
};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize block store: {0}")]
    BlockStore(#[from] StorageError),

    #[error("Failed to initialize resume store: {0}")]
    ResumeStore(#[from] sqlx::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    engine: UploadEngine,
}

impl AppState {
    /// Connect the configured backends and build the upload engine
    pub async fn new(config: Config) -> Result<Self, StateError> {
        let engine = build_engine(&config).await?;
        Ok(Self::with_engine(config, engine))
    }

    /// Wrap an already constructed engine
    pub fn with_engine(config: Config, engine: UploadEngine) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, engine }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload engine
    pub fn engine(&self) -> &UploadEngine {
        &self.inner.engine
    }

    /// Per-call options, falling back to the server defaults
    pub fn upload_options(&self, chunk_size: Option<usize>, max_retries: Option<u32>) -> UploadOptions {
        let upload = &self.inner.config.upload;
        UploadOptions {
            chunk_size: chunk_size.unwrap_or(upload.chunk_size),
            max_retries: max_retries.unwrap_or(upload.max_retries),
        }
    }
}

/// Construct the block store, resume store and engine described by `config`
pub async fn build_engine(config: &Config) -> Result<UploadEngine, StateError> {
    let block_store: Arc<dyn BlockStore> = match &config.storage {
        StorageConfig::S3(s3) => {
            tracing::info!(bucket = %s3.bucket, "Using S3 block store");
            Arc::new(S3Client::new(s3).await?)
        }
        StorageConfig::Local(local) => {
            tracing::info!(root = %local.root.display(), "Using local block store");
            tokio::fs::create_dir_all(&local.root)
                .await
                .map_err(StorageError::from)?;
            Arc::new(LocalBlockStore::new(&local.root))
        }
    };

    let resume_store: Arc<dyn ResumeStore> = match &config.resume {
        ResumeConfig::File { dir } => {
            tracing::info!(dir = %dir.display(), "Using file resume store");
            Arc::new(FileResumeStore::new(dir))
        }
        ResumeConfig::Sqlite { url } => {
            tracing::info!(url = %url, "Using SQLite resume store");
            let pool = crate::db::create_pool(url).await?;
            Arc::new(SqliteResumeStore::new(pool))
        }
    };

    Ok(UploadEngine::new(block_store, resume_store, ProgressRegistry::new())
        .with_max_file_size(config.upload.max_file_size)
        .with_backoff_unit(config.upload.backoff_unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalStorageConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_backends_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage = StorageConfig::Local(LocalStorageConfig {
            root: temp_dir.path().join("objects"),
        });
        config.resume = ResumeConfig::Sqlite {
            url: format!("sqlite:{}", temp_dir.path().join("state.db").display()),
        };
        config.upload.max_file_size = 1024;

        let state = AppState::new(config).await.unwrap();
        assert!(temp_dir.path().join("objects").is_dir());
        assert_eq!(state.engine().max_file_size(), 1024);
    }

    #[test]
    fn test_upload_options_fall_back_to_config() {
        let mut config = Config::default();
        config.upload.chunk_size = 10;
        config.upload.max_retries = 1;

        let engine = UploadEngine::new(
            Arc::new(crate::storage::MemoryBlockStore::new()),
            Arc::new(FileResumeStore::new("/nonexistent")),
            ProgressRegistry::new(),
        );
        let state = AppState::with_engine(config, engine);

        let defaults = state.upload_options(None, None);
        assert_eq!((defaults.chunk_size, defaults.max_retries), (10, 1));

        let custom = state.upload_options(Some(64), Some(5));
        assert_eq!((custom.chunk_size, custom.max_retries), (64, 5));
    }
}
