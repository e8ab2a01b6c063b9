//! Upload Engine
//!
//! Streams a local file to a block store:
//! - Reads the file in fixed-size chunks and stages each one as a block
//! - Retries a failed block with exponential backoff under the same block id
//! - Persists the staged offset and block list after every block
//! - Commits the ordered block list once the whole file is staged
//!
//! An interrupted upload of the same target picks up from its last
//! persisted offset and never re-stages blocks it already recorded.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use crate::storage::BlockStore;

use super::progress::ProgressRegistry;
use super::resume::{ResumePhase, ResumeStore, ResumeUpdate};
use super::types::{UploadError, UploadOptions, UploadReport, UploadSession, MAX_FILE_SIZE};

/// Base delay between block retries
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

// ============================================================================
// Upload Engine
// ============================================================================

/// Uploads files as staged blocks and tracks their progress
#[derive(Clone)]
pub struct UploadEngine {
    inner: Arc<UploadEngineInner>,
}

struct UploadEngineInner {
    block_store: Arc<dyn BlockStore>,
    resume_store: Arc<dyn ResumeStore>,
    progress: ProgressRegistry,
    max_file_size: u64,
    backoff_unit: Duration,
}

/// Removes a target's progress entry when the upload ends, however it ends
struct ProgressGuard<'a> {
    registry: &'a ProgressRegistry,
    target_name: &'a str,
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.target_name);
    }
}

impl UploadEngine {
    /// Create an engine over the given block and resume stores
    pub fn new(
        block_store: Arc<dyn BlockStore>,
        resume_store: Arc<dyn ResumeStore>,
        progress: ProgressRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(UploadEngineInner {
                block_store,
                resume_store,
                progress,
                max_file_size: MAX_FILE_SIZE,
                backoff_unit: DEFAULT_BACKOFF_UNIT,
            }),
        }
    }

    /// Override the largest accepted source file
    pub fn with_max_file_size(self, max_file_size: u64) -> Self {
        self.rebuild(|inner| inner.max_file_size = max_file_size)
    }

    /// Override the base retry delay; retry `n` waits `unit * 2^n`
    pub fn with_backoff_unit(self, backoff_unit: Duration) -> Self {
        self.rebuild(|inner| inner.backoff_unit = backoff_unit)
    }

    fn rebuild(self, apply: impl FnOnce(&mut UploadEngineInner)) -> Self {
        let mut inner = UploadEngineInner {
            block_store: self.inner.block_store.clone(),
            resume_store: self.inner.resume_store.clone(),
            progress: self.inner.progress.clone(),
            max_file_size: self.inner.max_file_size,
            backoff_unit: self.inner.backoff_unit,
        };
        apply(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.inner.progress
    }

    /// Current percentage for an in-flight upload
    pub fn get_progress(&self, target_name: &str) -> Option<f64> {
        self.inner.progress.get(target_name)
    }

    /// Percentages of every in-flight upload
    pub fn all_progress(&self) -> HashMap<String, f64> {
        self.inner.progress.snapshot()
    }

    pub fn max_file_size(&self) -> u64 {
        self.inner.max_file_size
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Upload `file_path` as the object `target_name`.
    ///
    /// Resumes from a persisted record for the same target when one exists.
    /// On failure the record keeps every block staged so far, so calling
    /// again with the same target continues where this call stopped.
    pub async fn upload_stream(
        &self,
        file_path: impl AsRef<Path>,
        target_name: &str,
        options: UploadOptions,
    ) -> Result<UploadReport, UploadError> {
        let path = file_path.as_ref();

        if options.chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }

        let file_size = tokio::fs::metadata(path).await?.len();
        if file_size > self.inner.max_file_size {
            tracing::warn!(
                target_name = %target_name,
                file_size,
                max = self.inner.max_file_size,
                "Rejected oversized upload"
            );
            return Err(UploadError::FileTooLarge {
                size: file_size,
                max: self.inner.max_file_size,
            });
        }

        if !self.inner.progress.try_begin(target_name, 0.0) {
            return Err(UploadError::UploadInProgress(target_name.to_string()));
        }
        let _guard = ProgressGuard {
            registry: &self.inner.progress,
            target_name,
        };

        tracing::info!(
            target_name = %target_name,
            path = %path.display(),
            file_size,
            chunk_size = options.chunk_size,
            max_retries = options.max_retries,
            "Starting upload"
        );

        let result = self.run(path, target_name, file_size, options).await;

        match &result {
            Ok(report) => tracing::info!(
                target_name = %target_name,
                total_size = report.total_size,
                blocks = report.block_count,
                staged = report.blocks_staged,
                resumed_from = report.resumed_from,
                "Upload complete"
            ),
            Err(e) => tracing::error!(
                target_name = %target_name,
                error = %e,
                "Upload failed"
            ),
        }

        result
    }

    async fn run(
        &self,
        path: &Path,
        target_name: &str,
        file_size: u64,
        options: UploadOptions,
    ) -> Result<UploadReport, UploadError> {
        let mut session = self.open_session(target_name, file_size).await?;
        self.inner.progress.set(target_name, session.progress());

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(session.uploaded_size)).await?;

        let mut buf = Vec::new();
        let mut blocks_staged = 0;

        loop {
            // Never read past the size fixed at session start
            let limit = (options.chunk_size as u64).min(session.remaining());
            if limit == 0 {
                break;
            }

            buf.clear();
            (&mut file).take(limit).read_to_end(&mut buf).await?;
            if buf.is_empty() {
                break;
            }

            let block_id = Uuid::new_v4().to_string();
            self.stage_with_retry(&mut session, &block_id, &buf, options.max_retries)
                .await?;

            session.record_block(block_id, buf.len());
            blocks_staged += 1;
            self.inner.progress.set(target_name, session.progress());

            self.inner
                .resume_store
                .save(ResumeUpdate::new(
                    target_name,
                    session.uploaded_size,
                    &session.block_ids,
                    ResumePhase::Staging,
                ))
                .await?;

            tracing::debug!(
                target_name = %target_name,
                block = session.block_ids.len(),
                uploaded = session.uploaded_size,
                total = session.total_size,
                "Staged block"
            );
        }

        if session.uploaded_size != session.total_size {
            return Err(UploadError::SourceTruncated {
                target: target_name.to_string(),
                expected: session.total_size,
                actual: session.uploaded_size,
            });
        }

        self.inner
            .resume_store
            .save(ResumeUpdate::new(
                target_name,
                session.uploaded_size,
                &session.block_ids,
                ResumePhase::CommitPending,
            ))
            .await?;

        self.inner
            .block_store
            .commit_block_list(target_name, &session.block_ids)
            .await
            .map_err(|source| UploadError::Commit {
                target: target_name.to_string(),
                source,
            })?;

        self.inner.resume_store.clear(target_name).await?;

        Ok(UploadReport {
            target_name: target_name.to_string(),
            total_size: session.total_size,
            block_count: session.block_ids.len(),
            blocks_staged,
            resumed_from: session.resumed_from,
        })
    }

    /// Start a fresh session or continue from the persisted record
    async fn open_session(
        &self,
        target_name: &str,
        file_size: u64,
    ) -> Result<UploadSession, UploadError> {
        let record = match self.inner.resume_store.load(target_name).await? {
            Some(record) => record,
            None => return Ok(UploadSession::new(target_name, file_size)),
        };

        if record.uploaded_size > file_size {
            tracing::warn!(
                target_name = %target_name,
                recorded = record.uploaded_size,
                file_size,
                "Resume record is larger than the source, restarting"
            );
            self.inner.resume_store.clear(target_name).await?;
            return Ok(UploadSession::new(target_name, file_size));
        }

        tracing::info!(
            target_name = %target_name,
            offset = record.uploaded_size,
            blocks = record.block_ids.len(),
            phase = ?record.phase,
            "Resuming upload"
        );

        Ok(UploadSession::resumed(
            target_name,
            file_size,
            record.uploaded_size,
            record.block_ids,
        ))
    }

    /// Stage one block, retrying under the same id until the budget runs out
    async fn stage_with_retry(
        &self,
        session: &mut UploadSession,
        block_id: &str,
        data: &[u8],
        max_retries: u32,
    ) -> Result<(), UploadError> {
        loop {
            let err = match self
                .inner
                .block_store
                .stage_block(&session.target_name, block_id, data)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            session.retry_count += 1;
            if session.retry_count > max_retries {
                return Err(UploadError::Stage {
                    target: session.target_name.clone(),
                    attempts: session.retry_count,
                    source: err,
                });
            }

            let delay = backoff_delay(self.inner.backoff_unit, session.retry_count);
            tracing::warn!(
                target_name = %session.target_name,
                block_id = %block_id,
                attempt = session.retry_count,
                max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Staging block failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Delay before retry number `retry` (1-based)
fn backoff_delay(unit: Duration, retry: u32) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(retry))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;
    use crate::upload::resume::FileResumeStore;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        blocks: MemoryBlockStore,
        resume: Arc<FileResumeStore>,
        engine: UploadEngine,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let blocks = MemoryBlockStore::new();
        let resume = Arc::new(FileResumeStore::new(dir.path().join("state")));
        let engine = UploadEngine::new(
            Arc::new(blocks.clone()),
            resume.clone(),
            ProgressRegistry::new(),
        )
        .with_backoff_unit(Duration::from_millis(1));
        Harness {
            dir,
            blocks,
            resume,
            engine,
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn write_source(h: &Harness, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = h.dir.path().join(name);
        tokio::fs::write(&path, data).await.unwrap();
        path
    }

    fn options(chunk_size: usize, max_retries: u32) -> UploadOptions {
        UploadOptions {
            chunk_size,
            max_retries,
        }
    }

    #[test]
    fn test_backoff_doubles_per_retry() {
        let unit = Duration::from_millis(100);
        assert_eq!(backoff_delay(unit, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(unit, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(unit, 3), Duration::from_millis(800));
        // Exponent saturates at u32::MAX, the product at Duration::MAX
        assert_eq!(backoff_delay(unit, 64), unit * u32::MAX);
        assert_eq!(
            backoff_delay(Duration::from_secs(u64::MAX / 2), 2),
            Duration::MAX
        );
    }

    #[tokio::test]
    async fn test_block_count_matches_chunking() {
        for (len, chunk) in [(0usize, 4usize), (1, 4), (4, 4), (5, 4), (1000, 7)] {
            let h = harness();
            let data = pattern(len);
            let path = write_source(&h, "src.bin", &data).await;

            let report = h
                .engine
                .upload_stream(&path, "out.bin", options(chunk, 0))
                .await
                .unwrap();

            let expected_blocks = len.div_ceil(chunk);
            assert_eq!(report.block_count, expected_blocks, "len {} chunk {}", len, chunk);
            assert_eq!(report.total_size, len as u64);

            let object = h.blocks.committed("out.bin").unwrap();
            assert_eq!(object.data, data);
            assert_eq!(object.block_ids.len(), expected_blocks);

            // Every block but the last is exactly one chunk
            let calls = h.blocks.stage_calls_for("out.bin");
            for call in calls.iter().take(calls.len().saturating_sub(1)) {
                assert_eq!(call.len, chunk);
            }

            assert!(h.resume.load("out.bin").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_resume_stages_only_remaining_blocks() {
        let h = harness();
        let data = pattern(10);
        let path = write_source(&h, "src.bin", &data).await;

        // Third attempt onward fails, and no retries are allowed
        h.blocks.fail_stage_attempts(2, usize::MAX - 2);
        let result = h.engine.upload_stream(&path, "out.bin", options(3, 0)).await;
        assert!(matches!(result, Err(UploadError::Stage { attempts: 1, .. })));
        assert!(h.blocks.committed("out.bin").is_none());

        let record = h.resume.load("out.bin").await.unwrap().unwrap();
        assert_eq!(record.uploaded_size, 6);
        assert_eq!(record.block_ids.len(), 2);
        assert_eq!(record.phase, ResumePhase::Staging);

        h.blocks.fail_stage_attempts(0, 0);
        let report = h
            .engine
            .upload_stream(&path, "out.bin", options(3, 0))
            .await
            .unwrap();

        assert_eq!(report.resumed_from, 6);
        assert_eq!(report.blocks_staged, 2);
        assert_eq!(report.block_count, 4);

        let calls = h.blocks.stage_calls_for("out.bin");
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].len, 3);
        assert_eq!(calls[3].len, 1);

        let object = h.blocks.committed("out.bin").unwrap();
        assert_eq!(&object.block_ids[..2], &record.block_ids[..]);
        assert_eq!(object.block_ids[2], calls[2].block_id);
        assert_eq!(object.block_ids[3], calls[3].block_id);
        assert_eq!(object.data, data);
        assert!(h.resume.load("out.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let h = harness();
        let path = write_source(&h, "src.bin", &pattern(8)).await;

        // First block succeeds, then the second fails max_retries + 1 times
        h.blocks.fail_stage_attempts(1, 3);
        let result = h.engine.upload_stream(&path, "out.bin", options(4, 2)).await;

        match result {
            Err(UploadError::Stage { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected stage failure, got {:?}", other.map(|r| r.block_count)),
        }
        assert_eq!(h.blocks.stage_attempts(), 4);
        assert!(h.blocks.committed("out.bin").is_none());

        let record = h.resume.load("out.bin").await.unwrap().unwrap();
        assert_eq!(record.uploaded_size, 4);
        assert_eq!(record.block_ids, vec![h.blocks.stage_calls()[0].block_id.clone()]);
        assert!(h.engine.get_progress("out.bin").is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_with_same_block_id() {
        let h = harness();
        let data = pattern(8);
        let path = write_source(&h, "src.bin", &data).await;

        h.blocks.fail_stage_attempts(0, 2);
        let report = h
            .engine
            .upload_stream(&path, "out.bin", options(4, 2))
            .await
            .unwrap();

        assert_eq!(report.block_count, 2);
        assert_eq!(h.blocks.stage_attempts(), 4);

        let attempted = h.blocks.attempted_block_ids("out.bin");
        assert_eq!(attempted.len(), 4);
        assert_eq!(attempted[0], attempted[1]);
        assert_eq!(attempted[1], attempted[2]);
        assert_ne!(attempted[2], attempted[3]);

        let object = h.blocks.committed("out.bin").unwrap();
        assert_eq!(object.block_ids, vec![attempted[0].clone(), attempted[3].clone()]);
        assert_eq!(object.data, data);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_complete_at_commit() {
        let h = harness();
        h.blocks.observe_progress(h.engine.progress().clone());
        let path = write_source(&h, "src.bin", &pattern(10)).await;

        h.engine
            .upload_stream(&path, "out.bin", options(3, 0))
            .await
            .unwrap();

        let readings: Vec<f64> = h
            .blocks
            .observed_progress("out.bin")
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        // Four stage calls then the commit
        assert_eq!(readings.len(), 5);
        assert_eq!(readings[0], 0.0);
        assert!(readings.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*readings.last().unwrap(), 100.0);

        assert!(h.engine.get_progress("out.bin").is_none());
        assert!(h.engine.all_progress().is_empty());
    }

    #[tokio::test]
    async fn test_resumed_upload_reports_prior_progress() {
        let h = harness();
        h.blocks.observe_progress(h.engine.progress().clone());
        let path = write_source(&h, "src.bin", &pattern(8)).await;

        h.blocks.fail_stage_attempts(1, 1);
        assert!(h
            .engine
            .upload_stream(&path, "out.bin", options(4, 0))
            .await
            .is_err());

        h.blocks.fail_stage_attempts(0, 0);
        h.engine
            .upload_stream(&path, "out.bin", options(4, 0))
            .await
            .unwrap();

        // First run: 0, 50 (failed attempt). Second run starts at 50.
        let readings = h.blocks.observed_progress("out.bin");
        assert_eq!(readings, vec![Some(0.0), Some(50.0), Some(50.0), Some(100.0)]);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_are_independent() {
        let h = harness();
        h.blocks.set_stage_delay(Duration::from_millis(2));

        let first = pattern(64);
        let second: Vec<u8> = pattern(50).into_iter().rev().collect();
        let first_path = write_source(&h, "first.bin", &first).await;
        let second_path = write_source(&h, "second.bin", &second).await;

        let a = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.upload_stream(&first_path, "first", options(8, 0)).await })
        };
        let b = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.upload_stream(&second_path, "second", options(8, 0)).await })
        };

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.block_count, 8);
        assert_eq!(b.block_count, 7);

        let first_object = h.blocks.committed("first").unwrap();
        let second_object = h.blocks.committed("second").unwrap();
        assert_eq!(first_object.data, first);
        assert_eq!(second_object.data, second);
        assert!(first_object
            .block_ids
            .iter()
            .all(|id| !second_object.block_ids.contains(id)));

        // Stage calls interleave, yet each target keeps its own order
        let calls = h.blocks.stage_calls();
        let first_of_second = calls.iter().position(|c| c.target == "second").unwrap();
        let last_of_first = calls.iter().rposition(|c| c.target == "first").unwrap();
        assert!(first_of_second < last_of_first);
        let staged_first: Vec<String> = h
            .blocks
            .stage_calls_for("first")
            .into_iter()
            .map(|c| c.block_id)
            .collect();
        assert_eq!(staged_first, first_object.block_ids);
        assert!(h.engine.all_progress().is_empty());
    }

    #[tokio::test]
    async fn test_same_target_cannot_upload_twice_at_once() {
        let h = harness();
        let path = write_source(&h, "src.bin", &pattern(4)).await;

        assert!(h.engine.progress().try_begin("busy.bin", 12.5));
        let result = h.engine.upload_stream(&path, "busy.bin", options(4, 0)).await;

        assert!(matches!(result, Err(UploadError::UploadInProgress(_))));
        assert_eq!(h.engine.get_progress("busy.bin"), Some(12.5));
        assert_eq!(h.blocks.stage_attempts(), 0);
    }

    #[tokio::test]
    async fn test_oversized_file_rejected_before_staging() {
        let dir = TempDir::new().unwrap();
        let blocks = MemoryBlockStore::new();
        let resume = Arc::new(FileResumeStore::new(dir.path().join("state")));
        let engine = UploadEngine::new(Arc::new(blocks.clone()), resume.clone(), ProgressRegistry::new())
            .with_max_file_size(10);

        let path = dir.path().join("big.bin");
        tokio::fs::write(&path, pattern(11)).await.unwrap();

        let result = engine.upload_stream(&path, "big.bin", options(4, 0)).await;
        assert!(matches!(result, Err(UploadError::FileTooLarge { size: 11, max: 10 })));
        assert_eq!(blocks.stage_attempts(), 0);
        assert!(resume.load("big.bin").await.unwrap().is_none());
        assert!(engine.all_progress().is_empty());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let h = harness();
        let path = write_source(&h, "src.bin", &pattern(4)).await;
        let result = h.engine.upload_stream(&path, "out.bin", options(0, 0)).await;
        assert!(matches!(result, Err(UploadError::InvalidChunkSize)));
        assert_eq!(h.blocks.stage_attempts(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let h = harness();
        let missing = h.dir.path().join("missing.bin");
        let result = h.engine.upload_stream(&missing, "out.bin", options(4, 0)).await;
        assert!(matches!(result, Err(UploadError::Io(_))));
        assert!(h.engine.all_progress().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_recommits_without_restaging() {
        let h = harness();
        let data = pattern(9);
        let path = write_source(&h, "src.bin", &data).await;

        h.blocks.fail_commits(1);
        let result = h.engine.upload_stream(&path, "out.bin", options(4, 0)).await;
        assert!(matches!(result, Err(UploadError::Commit { .. })));

        let record = h.resume.load("out.bin").await.unwrap().unwrap();
        assert_eq!(record.phase, ResumePhase::CommitPending);
        assert_eq!(record.uploaded_size, 9);
        assert_eq!(record.block_ids.len(), 3);

        let report = h
            .engine
            .upload_stream(&path, "out.bin", options(4, 0))
            .await
            .unwrap();
        assert_eq!(report.blocks_staged, 0);
        assert_eq!(report.resumed_from, 9);
        assert_eq!(h.blocks.stage_attempts(), 3);
        assert_eq!(h.blocks.committed("out.bin").unwrap().data, data);
        assert!(h.resume.load("out.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_record_larger_than_source_restarts() {
        let h = harness();
        let data = pattern(5);
        let path = write_source(&h, "src.bin", &data).await;

        let ids = vec!["old-1".to_string(), "old-2".to_string()];
        h.resume
            .save(ResumeUpdate::new("out.bin", 64, &ids, ResumePhase::Staging))
            .await
            .unwrap();

        let report = h
            .engine
            .upload_stream(&path, "out.bin", options(4, 0))
            .await
            .unwrap();

        assert_eq!(report.resumed_from, 0);
        assert_eq!(report.block_count, 2);
        assert_eq!(h.blocks.committed("out.bin").unwrap().data, data);
    }

    #[tokio::test]
    async fn test_resume_store_failure_aborts_upload() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("state");
        tokio::fs::write(&blocker, b"not a directory").await.unwrap();

        let blocks = MemoryBlockStore::new();
        let engine = UploadEngine::new(
            Arc::new(blocks.clone()),
            Arc::new(FileResumeStore::new(&blocker)),
            ProgressRegistry::new(),
        );

        let path = dir.path().join("src.bin");
        tokio::fs::write(&path, pattern(8)).await.unwrap();

        let result = engine.upload_stream(&path, "out.bin", options(4, 0)).await;
        assert!(matches!(result, Err(UploadError::ResumeState(_))));
        assert!(blocks.committed("out.bin").is_none());
        assert!(engine.all_progress().is_empty());
    }

    #[tokio::test]
    async fn test_source_shrinking_mid_upload_is_truncation() {
        let h = harness();
        let path = write_source(&h, "src.bin", &pattern(12)).await;
        h.blocks.set_stage_delay(Duration::from_millis(50));

        let engine = h.engine.clone();
        let source = path.clone();
        let upload =
            tokio::spawn(async move { engine.upload_stream(&source, "out.bin", options(4, 0)).await });

        // Shrink the source while the first block is being staged
        while h.blocks.stage_attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .unwrap()
            .set_len(4)
            .await
            .unwrap();

        let result = upload.await.unwrap();
        assert!(matches!(
            result,
            Err(UploadError::SourceTruncated { expected: 12, actual: 4, .. })
        ));
        assert!(h.blocks.committed("out.bin").is_none());
        assert!(h.engine.all_progress().is_empty());

        let record = h.resume.load("out.bin").await.unwrap().unwrap();
        assert_eq!(record.phase, ResumePhase::Staging);
        assert_eq!(record.uploaded_size, 4);
        assert_eq!(record.block_ids.len(), 1);
    }
}
