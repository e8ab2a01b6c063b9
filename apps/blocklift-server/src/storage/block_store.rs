//! Block store trait
//!
//! The only primitives the upload engine relies on. Stores offer no
//! server-side resume support: everything needed to continue an upload
//! lives in the engine's resume records.

use crate::error::StorageError;

#[async_trait::async_trait]
pub trait BlockStore: Send + Sync {
    /// Stage `data` for `target` under `block_id`.
    ///
    /// Staging the same id twice replaces the earlier data, so a retry after
    /// a lost response does not leave a duplicate block behind.
    async fn stage_block(
        &self,
        target: &str,
        block_id: &str,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Make `target` visible as the concatenation of the listed blocks, in order
    async fn commit_block_list(
        &self,
        target: &str,
        block_ids: &[String],
    ) -> Result<(), StorageError>;
}
