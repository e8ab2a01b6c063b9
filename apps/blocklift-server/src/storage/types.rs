//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest part S3 accepts in a multipart upload (except the last one)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Largest part S3 accepts in a multipart upload
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Most parts a single multipart upload may have
pub const MAX_PARTS: u64 = 10_000;

/// Part size that fits an object of `total` bytes within [`MAX_PARTS`]
///
/// Returns `None` when even [`MAX_PART_SIZE`] parts cannot hold it.
pub fn part_size_for(total: u64) -> Option<usize> {
    let needed = total.div_ceil(MAX_PARTS).max(MIN_PART_SIZE as u64);
    if needed > MAX_PART_SIZE {
        return None;
    }
    usize::try_from(needed).ok()
}

/// Metadata about a storage object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// A storage object with its data
#[derive(Debug)]
pub struct StorageObject {
    pub metadata: ObjectMetadata,
    pub data: Vec<u8>,
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct ObjectList {
    pub objects: Vec<ObjectMetadata>,
    pub continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Options for listing objects
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }
}

/// Groups staged blocks into multipart parts.
///
/// Blocks are appended to the current part until it reaches the part size;
/// whatever is left becomes the final part. Every part but the last holds at
/// least `part_size` bytes, so an object of `n` bytes needs at most
/// `ceil(n / part_size)` parts.
#[derive(Debug)]
pub struct PartBuffer {
    current: Vec<u8>,
    part_size: usize,
    emitted: usize,
}

impl Default for PartBuffer {
    fn default() -> Self {
        Self::with_part_size(MIN_PART_SIZE)
    }
}

impl PartBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close parts at `part_size` bytes (never below [`MIN_PART_SIZE`])
    pub fn with_part_size(part_size: usize) -> Self {
        Self {
            current: Vec::new(),
            part_size: part_size.max(MIN_PART_SIZE),
            emitted: 0,
        }
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Append a block; returns a full part once the part size is reached
    pub fn push(&mut self, block: &[u8]) -> Option<Vec<u8>> {
        self.current.extend_from_slice(block);
        if self.current.len() >= self.part_size {
            self.emitted += 1;
            return Some(std::mem::take(&mut self.current));
        }
        None
    }

    /// The trailing part, if any. An upload always has at least one part.
    pub fn finish(self) -> Option<Vec<u8>> {
        if !self.current.is_empty() || self.emitted == 0 {
            Some(self.current)
        } else {
            None
        }
    }
}
