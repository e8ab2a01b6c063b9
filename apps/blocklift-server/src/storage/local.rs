//! Local filesystem block store
//!
//! Staged blocks live under `<root>/.blocks/<encoded target>/<block id>`.
//! Committing concatenates them into `<root>/<target>` through a temp file
//! and a rename, so a reader never sees a partially assembled object.

use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;

use super::block_store::BlockStore;

const STAGING_DIR: &str = ".blocks";

pub struct LocalBlockStore {
    root: PathBuf,
}

impl LocalBlockStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a committed object is stored
    pub fn object_path(&self, target: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(target);
        let valid = !target.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && relative
                .components()
                .next()
                .map_or(false, |c| c.as_os_str() != STAGING_DIR);

        if !valid {
            return Err(StorageError::InvalidTarget(target.to_string()));
        }

        Ok(self.root.join(relative))
    }

    fn staging_dir(&self, target: &str) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(urlencoding::encode(target).into_owned())
    }

    fn block_path(&self, target: &str, block_id: &str) -> PathBuf {
        self.staging_dir(target)
            .join(urlencoding::encode(block_id).into_owned())
    }

    async fn assemble(&self, tmp: &Path, target: &str, block_ids: &[String]) -> Result<(), StorageError> {
        let mut out = tokio::fs::File::create(tmp).await?;

        for block_id in block_ids {
            let mut block = match tokio::fs::File::open(self.block_path(target, block_id)).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::BlockNotFound {
                        target: target.to_string(),
                        block_id: block_id.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            tokio::io::copy(&mut block, &mut out).await?;
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlockStore for LocalBlockStore {
    async fn stage_block(
        &self,
        target: &str,
        block_id: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        // Validate up front so bad names fail on the first block, not at commit
        self.object_path(target)?;

        let dir = self.staging_dir(target);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(self.block_path(target, block_id), data).await?;
        Ok(())
    }

    async fn commit_block_list(
        &self,
        target: &str,
        block_ids: &[String],
    ) -> Result<(), StorageError> {
        let dest = self.object_path(target)?;
        let parent = dest.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = self.assemble(&tmp, target, block_ids).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::remove_dir_all(self.staging_dir(target)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(target_name = %target, error = %e, "Failed to remove staged blocks");
            }
        }

        Ok(())
    }
}
