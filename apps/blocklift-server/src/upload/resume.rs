//! Resume-State Store
//!
//! Durable per-target records of how far an upload got: the byte offset
//! reached and the ordered list of staged block ids. Records are written
//! after every staged block and removed once the block list is committed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

// ============================================================================
// Types
// ============================================================================

/// Where an interrupted upload stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePhase {
    /// Blocks are still being staged
    Staging,
    /// Every block is staged; only the commit remains
    CommitPending,
}

impl ResumePhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::CommitPending => "commit_pending",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "staging" => Some(Self::Staging),
            "commit_pending" => Some(Self::CommitPending),
            _ => None,
        }
    }
}

/// Persisted progress of one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub target_name: String,
    pub uploaded_size: u64,
    pub block_ids: Vec<String>,
    pub phase: ResumePhase,
    pub updated_at: DateTime<Utc>,
}

impl ResumeRecord {
    /// Borrowed view suitable for [`ResumeStore::save`]
    pub fn as_update(&self) -> ResumeUpdate<'_> {
        ResumeUpdate {
            target_name: &self.target_name,
            uploaded_size: self.uploaded_size,
            block_ids: &self.block_ids,
            phase: self.phase,
            updated_at: self.updated_at,
        }
    }
}

/// A record to persist, borrowing the session's block list.
///
/// Serializes to the same document as [`ResumeRecord`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResumeUpdate<'a> {
    pub target_name: &'a str,
    pub uploaded_size: u64,
    pub block_ids: &'a [String],
    pub phase: ResumePhase,
    pub updated_at: DateTime<Utc>,
}

impl<'a> ResumeUpdate<'a> {
    pub fn new(
        target_name: &'a str,
        uploaded_size: u64,
        block_ids: &'a [String],
        phase: ResumePhase,
    ) -> Self {
        Self {
            target_name,
            uploaded_size,
            block_ids,
            phase,
            updated_at: Utc::now(),
        }
    }
}

/// Resume state errors
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt resume record {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// Resume Store Trait
// ============================================================================

/// Trait for resume state backends
#[async_trait::async_trait]
pub trait ResumeStore: Send + Sync {
    /// Load the record for a target, if one exists
    async fn load(&self, target_name: &str) -> Result<Option<ResumeRecord>, ResumeError>;

    /// Replace the record for `update.target_name`
    async fn save(&self, update: ResumeUpdate<'_>) -> Result<(), ResumeError>;

    /// Remove the record for a target; succeeds if there is none
    async fn clear(&self, target_name: &str) -> Result<(), ResumeError>;
}

// ============================================================================
// File Storage
// ============================================================================

/// One JSON document per target in a state directory
pub struct FileResumeStore {
    dir: PathBuf,
}

impl FileResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, target_name: &str) -> PathBuf {
        // Target names are arbitrary strings; hash them into safe file names
        let digest = Sha256::digest(target_name.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait::async_trait]
impl ResumeStore for FileResumeStore {
    async fn load(&self, target_name: &str) -> Result<Option<ResumeRecord>, ResumeError> {
        let path = self.record_path(target_name);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: ResumeRecord =
            serde_json::from_slice(&data).map_err(|source| ResumeError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;

        if record.target_name != target_name {
            tracing::warn!(
                target_name = %target_name,
                stored = %record.target_name,
                "Resume record belongs to a different target, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn save(&self, update: ResumeUpdate<'_>) -> Result<(), ResumeError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(update.target_name);
        let body = serde_json::to_vec(&update)?;

        // Write a sibling temp file, then rename over the record
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn clear(&self, target_name: &str) -> Result<(), ResumeError> {
        match tokio::fs::remove_file(self.record_path(target_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// SQLite Storage
// ============================================================================

/// Resume records as rows of the `resume_records` table
pub struct SqliteResumeStore {
    pool: SqlitePool,
}

impl SqliteResumeStore {
    /// Wrap a pool whose schema has already been initialized
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    target_name: String,
    uploaded_size: i64,
    block_ids: String,
    phase: String,
    updated_at: String,
}

impl RecordRow {
    fn into_record(self) -> Result<ResumeRecord, ResumeError> {
        let uploaded_size = u64::try_from(self.uploaded_size)
            .map_err(|_| ResumeError::InvalidValue(format!("uploaded_size {}", self.uploaded_size)))?;
        let phase = ResumePhase::parse(&self.phase)
            .ok_or_else(|| ResumeError::InvalidValue(format!("phase {}", self.phase)))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|_| ResumeError::InvalidValue(format!("updated_at {}", self.updated_at)))?
            .with_timezone(&Utc);

        Ok(ResumeRecord {
            target_name: self.target_name,
            uploaded_size,
            block_ids: serde_json::from_str(&self.block_ids)?,
            phase,
            updated_at,
        })
    }
}

#[async_trait::async_trait]
impl ResumeStore for SqliteResumeStore {
    async fn load(&self, target_name: &str) -> Result<Option<ResumeRecord>, ResumeError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT target_name, uploaded_size, block_ids, phase, updated_at
            FROM resume_records
            WHERE target_name = ?
            "#,
        )
        .bind(target_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecordRow::into_record).transpose()
    }

    async fn save(&self, update: ResumeUpdate<'_>) -> Result<(), ResumeError> {
        let uploaded_size = i64::try_from(update.uploaded_size)
            .map_err(|_| ResumeError::InvalidValue(format!("uploaded_size {}", update.uploaded_size)))?;

        sqlx::query(
            r#"
            INSERT INTO resume_records (target_name, uploaded_size, block_ids, phase, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(target_name) DO UPDATE SET
                uploaded_size = excluded.uploaded_size,
                block_ids = excluded.block_ids,
                phase = excluded.phase,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(update.target_name)
        .bind(uploaded_size)
        .bind(serde_json::to_string(update.block_ids)?)
        .bind(update.phase.as_str())
        .bind(update.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, target_name: &str) -> Result<(), ResumeError> {
        sqlx::query("DELETE FROM resume_records WHERE target_name = ?")
            .bind(target_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    fn record(target: &str, size: u64, ids: &[&str]) -> ResumeRecord {
        ResumeRecord {
            target_name: target.to_string(),
            uploaded_size: size,
            block_ids: ids.iter().map(|s| s.to_string()).collect(),
            phase: ResumePhase::Staging,
            updated_at: Utc::now(),
        }
    }

    async fn exercise_store(store: &dyn ResumeStore) {
        assert!(store.load("movie.mkv").await.unwrap().is_none());

        store.save(record("movie.mkv", 4, &["a"]).as_update()).await.unwrap();
        store.save(record("movie.mkv", 8, &["a", "b"]).as_update()).await.unwrap();
        store.save(record("notes.txt", 2, &["x"]).as_update()).await.unwrap();

        let loaded = store.load("movie.mkv").await.unwrap().unwrap();
        assert_eq!(loaded.uploaded_size, 8);
        assert_eq!(loaded.block_ids, vec!["a", "b"]);
        assert_eq!(loaded.phase, ResumePhase::Staging);

        let other = store.load("notes.txt").await.unwrap().unwrap();
        assert_eq!(other.block_ids, vec!["x"]);

        store.clear("movie.mkv").await.unwrap();
        assert!(store.load("movie.mkv").await.unwrap().is_none());
        assert!(store.load("notes.txt").await.unwrap().is_some());

        // Clearing an absent record is not an error
        store.clear("movie.mkv").await.unwrap();
        store.clear("never-started").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileResumeStore::new(temp_dir.path().join("state"));
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileResumeStore::new(temp_dir.path());

        store.save(record("a/b/../c.bin", 1, &["a"]).as_update()).await.unwrap();
        store.save(record("a/b/../c.bin", 2, &["a", "b"]).as_update()).await.unwrap();

        let mut entries = tokio::fs::read_dir(temp_dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }

        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
        assert!(!names[0].starts_with('.'));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileResumeStore::new(temp_dir.path());

        tokio::fs::write(store.record_path("broken.bin"), b"{\"target_name\": ")
            .await
            .unwrap();

        let result = store.load("broken.bin").await;
        assert!(matches!(result, Err(ResumeError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_file_store_ignores_foreign_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileResumeStore::new(temp_dir.path());

        let body = serde_json::to_vec(&record("other.bin", 3, &["z"])).unwrap();
        tokio::fs::write(store.record_path("mine.bin"), body).await.unwrap();

        assert!(store.load("mine.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_save_fails_when_dir_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("state");
        tokio::fs::write(&blocker, b"not a directory").await.unwrap();

        let store = FileResumeStore::new(&blocker);
        let result = store.save(record("a.bin", 1, &["a"]).as_update()).await;
        assert!(matches!(result, Err(ResumeError::Io(_))));
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();

        let store = SqliteResumeStore::new(pool);
        exercise_store(&store).await;

        let mut pending = record("final.iso", 10, &["a", "b"]);
        pending.phase = ResumePhase::CommitPending;
        store.save(pending.as_update()).await.unwrap();

        let loaded = store.load("final.iso").await.unwrap().unwrap();
        assert_eq!(loaded.phase, ResumePhase::CommitPending);
        assert_eq!(loaded.updated_at.timestamp(), pending.updated_at.timestamp());
    }
}
