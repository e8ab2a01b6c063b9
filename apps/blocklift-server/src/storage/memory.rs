//! In-memory block store
//!
//! Keeps staged blocks and committed objects in process memory. Used by the
//! test suite and benchmarks; supports injected failures and delays so the
//! engine's retry and concurrency behavior can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::upload::ProgressRegistry;

use super::block_store::BlockStore;

/// A successful stage call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCall {
    pub target: String,
    pub block_id: String,
    pub len: usize,
}

/// An object made visible by a commit
#[derive(Debug, Clone)]
pub struct CommittedObject {
    pub block_ids: Vec<String>,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    staged: HashMap<String, HashMap<String, Vec<u8>>>,
    committed: HashMap<String, CommittedObject>,
    stage_calls: Vec<StageCall>,
    attempted: Vec<(String, String)>,
    /// Global attempt indices that should fail: `[start, start + count)`
    failing_attempts: Option<(usize, usize)>,
    failing_commits: usize,
    stage_delay: Option<Duration>,
    observer: Option<ProgressRegistry>,
    observed: HashMap<String, Vec<Option<f64>>>,
}

#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    state: Arc<Mutex<MemoryState>>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `count` stage attempts starting with attempt number `start` (0-based)
    pub fn fail_stage_attempts(&self, start: usize, count: usize) {
        self.state.lock().failing_attempts = Some((start, count));
    }

    /// Fail the next `count` commits
    pub fn fail_commits(&self, count: usize) {
        self.state.lock().failing_commits = count;
    }

    /// Sleep this long inside every stage call
    pub fn set_stage_delay(&self, delay: Duration) {
        self.state.lock().stage_delay = Some(delay);
    }

    /// Record the registry's reading for the target on every stage and commit call
    pub fn observe_progress(&self, registry: ProgressRegistry) {
        self.state.lock().observer = Some(registry);
    }

    /// Progress readings recorded for `target`, in call order
    pub fn observed_progress(&self, target: &str) -> Vec<Option<f64>> {
        self.state.lock().observed.get(target).cloned().unwrap_or_default()
    }

    /// Every stage attempt, successful or not
    pub fn stage_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful stage calls, in completion order
    pub fn stage_calls(&self) -> Vec<StageCall> {
        self.state.lock().stage_calls.clone()
    }

    /// Successful stage calls for one target
    pub fn stage_calls_for(&self, target: &str) -> Vec<StageCall> {
        self.state
            .lock()
            .stage_calls
            .iter()
            .filter(|c| c.target == target)
            .cloned()
            .collect()
    }

    /// Block ids of every stage attempt for `target`, including failed ones
    pub fn attempted_block_ids(&self, target: &str) -> Vec<String> {
        self.state
            .lock()
            .attempted
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn committed(&self, target: &str) -> Option<CommittedObject> {
        self.state.lock().committed.get(target).cloned()
    }

    /// Number of blocks staged for `target` and not yet committed
    pub fn staged_count(&self, target: &str) -> usize {
        self.state.lock().staged.get(target).map_or(0, |b| b.len())
    }

    fn observe(state: &mut MemoryState, target: &str) {
        if let Some(registry) = &state.observer {
            let reading = registry.get(target);
            state.observed.entry(target.to_string()).or_default().push(reading);
        }
    }
}

#[async_trait::async_trait]
impl BlockStore for MemoryBlockStore {
    async fn stage_block(
        &self,
        target: &str,
        block_id: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = {
            let mut state = self.state.lock();
            Self::observe(&mut state, target);
            state.stage_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.attempted.push((target.to_string(), block_id.to_string()));
        if let Some((start, count)) = state.failing_attempts {
            if attempt >= start && attempt < start + count {
                return Err(StorageError::ConnectionFailed(format!(
                    "injected failure on attempt {}",
                    attempt
                )));
            }
        }

        state
            .staged
            .entry(target.to_string())
            .or_default()
            .insert(block_id.to_string(), data.to_vec());
        state.stage_calls.push(StageCall {
            target: target.to_string(),
            block_id: block_id.to_string(),
            len: data.len(),
        });
        Ok(())
    }

    async fn commit_block_list(
        &self,
        target: &str,
        block_ids: &[String],
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        Self::observe(&mut state, target);

        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(StorageError::SdkError("injected commit failure".to_string()));
        }

        let mut data = Vec::new();
        {
            let empty = HashMap::new();
            let staged = state.staged.get(target).unwrap_or(&empty);
            for block_id in block_ids {
                let block = staged.get(block_id).ok_or_else(|| StorageError::BlockNotFound {
                    target: target.to_string(),
                    block_id: block_id.clone(),
                })?;
                data.extend_from_slice(block);
            }
        }

        state.staged.remove(target);
        state.committed.insert(
            target.to_string(),
            CommittedObject {
                block_ids: block_ids.to_vec(),
                data,
            },
        );
        Ok(())
    }
}
