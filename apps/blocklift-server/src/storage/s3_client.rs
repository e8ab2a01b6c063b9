//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access. Blocks are staged as
//! ordinary objects under a staging prefix; committing a block list copies
//! them, in order, into a multipart upload of the target key.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use std::collections::HashMap;

use chrono::DateTime;

use crate::config::S3Config;
use crate::error::StorageError;

use super::block_store::BlockStore;
use super::types::{
    part_size_for, ListOptions, ObjectList, ObjectMetadata, PartBuffer, StorageObject,
};

type StorageResult<T> = std::result::Result<T, StorageError>;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
    staging_prefix: String,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "blocklift",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint {
            // Required for MinIO and other S3-compatible services
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    DisplayErrorContext(&e)
                );
            }
        }

        Ok(Self {
            client,
            bucket,
            staging_prefix: config.staging_prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key prefix holding every staged block of `target`
    fn staging_dir(&self, target: &str) -> String {
        format!("{}/{}/", self.staging_prefix, urlencoding::encode(target))
    }

    fn block_key(&self, target: &str, block_id: &str) -> String {
        format!("{}{}", self.staging_dir(target), urlencoding::encode(block_id))
    }

    /// Upload an object in a single request
    pub async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("put object", key, e))?;
        Ok(())
    }

    /// Get an object's data
    pub async fn get_object(&self, key: &str) -> StorageResult<StorageObject> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("get object", key, e))?;

        let metadata = ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response
                .last_modified()
                .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
            etag: response.e_tag().map(|s| s.to_string()),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(StorageObject { metadata, data })
    }

    /// Delete a single object
    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("delete object", key, e))?;
        Ok(())
    }

    /// List objects in the bucket
    pub async fn list_objects(&self, options: ListOptions) -> StorageResult<ObjectList> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);

        if let Some(prefix) = options.prefix {
            request = request.prefix(prefix);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|e| {
            StorageError::SdkError(format!("Failed to list objects: {}", DisplayErrorContext(&e)))
        })?;

        let objects: Vec<ObjectMetadata> = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0),
                last_modified: obj
                    .last_modified()
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
                etag: obj.e_tag().map(|s| s.to_string()),
            })
            .collect();

        Ok(ObjectList {
            objects,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    /// List all objects with a given prefix (handles pagination)
    pub async fn list_all_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectMetadata>> {
        let mut all_objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(1000).with_prefix(prefix);

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list_objects(options).await?;
            all_objects.extend(result.objects);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
        }

        Ok(all_objects)
    }

    /// Delete every object under a prefix, returning how many were removed
    pub async fn delete_objects_with_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let objects = self.list_all_objects(prefix).await?;
        for object in &objects {
            self.delete_object(&object.key).await?;
        }
        Ok(objects.len())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> StorageResult<CompletedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("upload part", key, e))?;

        Ok(CompletedPart::builder()
            .set_e_tag(response.e_tag().map(|s| s.to_string()))
            .part_number(part_number)
            .build())
    }

    /// Total size of the listed blocks, given a listing of the staging prefix
    fn staged_total(
        &self,
        target: &str,
        block_ids: &[String],
        staged: &[ObjectMetadata],
    ) -> StorageResult<u64> {
        let sizes: HashMap<&str, i64> = staged.iter().map(|o| (o.key.as_str(), o.size)).collect();

        block_ids.iter().try_fold(0u64, |total, block_id| {
            let size = sizes
                .get(self.block_key(target, block_id).as_str())
                .ok_or_else(|| StorageError::BlockNotFound {
                    target: target.to_string(),
                    block_id: block_id.clone(),
                })?;
            Ok(total + u64::try_from(*size).unwrap_or(0))
        })
    }

    /// Copy staged blocks into the multipart upload, in list order
    async fn upload_blocks_as_parts(
        &self,
        target: &str,
        upload_id: &str,
        block_ids: &[String],
        part_size: usize,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut buffer = PartBuffer::with_part_size(part_size);

        for block_id in block_ids {
            let block = self
                .get_object(&self.block_key(target, block_id))
                .await
                .map_err(|e| match e {
                    StorageError::ObjectNotFound(_) => StorageError::BlockNotFound {
                        target: target.to_string(),
                        block_id: block_id.clone(),
                    },
                    other => other,
                })?;

            if let Some(part) = buffer.push(&block.data) {
                let number = parts.len() as i32 + 1;
                parts.push(self.upload_part(target, upload_id, number, part).await?);
            }
        }

        if let Some(part) = buffer.finish() {
            let number = parts.len() as i32 + 1;
            parts.push(self.upload_part(target, upload_id, number, part).await?);
        }

        Ok(parts)
    }
}

#[async_trait::async_trait]
impl BlockStore for S3Client {
    async fn stage_block(
        &self,
        target: &str,
        block_id: &str,
        data: &[u8],
    ) -> StorageResult<()> {
        let key = self.block_key(target, block_id);
        self.put_object(&key, data.to_vec(), "application/octet-stream").await
    }

    async fn commit_block_list(&self, target: &str, block_ids: &[String]) -> StorageResult<()> {
        // Size parts from the whole object so the part count stays within limits
        let staged = self.list_all_objects(&self.staging_dir(target)).await?;
        let total = self.staged_total(target, block_ids, &staged)?;
        let part_size = part_size_for(total).ok_or_else(|| StorageError::ObjectTooLarge {
            target: target.to_string(),
            size: total,
        })?;
        tracing::debug!(
            target_name = %target,
            total,
            part_size,
            blocks = block_ids.len(),
            "Committing block list"
        );

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(target)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| map_sdk_error("create multipart upload", target, e))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::SdkError(format!("No upload id returned for {}", target)))?
            .to_string();

        let parts = match self.upload_blocks_as_parts(target, &upload_id, block_ids, part_size).await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(target)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        target_name = %target,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                return Err(e);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(target)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("complete multipart upload", target, e))?;

        // The object is committed; leftover staged blocks are only garbage
        match self.delete_objects_with_prefix(&self.staging_dir(target)).await {
            Ok(count) => {
                tracing::debug!(target_name = %target, count, "Removed staged blocks");
            }
            Err(e) => {
                tracing::warn!(target_name = %target, error = %e, "Failed to remove staged blocks");
            }
        }

        Ok(())
    }
}

fn map_sdk_error<E>(action: &str, key: &str, err: E) -> StorageError
where
    E: std::error::Error,
{
    let message = DisplayErrorContext(&err).to_string();
    if message.contains("404") || message.contains("NoSuchKey") {
        StorageError::ObjectNotFound(key.to_string())
    } else if message.contains("AccessDenied") || message.contains("403") {
        StorageError::AccessDenied(key.to_string())
    } else if message.contains("NoSuchBucket") {
        StorageError::BucketNotFound(key.to_string())
    } else if message.contains("dispatch failure") || message.contains("timeout") {
        StorageError::ConnectionFailed(format!("Failed to {} {}: {}", action, key, message))
    } else {
        StorageError::SdkError(format!("Failed to {} {}: {}", action, key, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> S3Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        S3Client {
            client: Client::from_conf(config),
            bucket: "uploads".to_string(),
            staging_prefix: ".blocks".to_string(),
        }
    }

    #[test]
    fn test_block_keys_are_scoped_per_target() {
        let s3 = client();
        assert_eq!(s3.staging_dir("movie.mkv"), ".blocks/movie.mkv/");
        assert_eq!(s3.block_key("movie.mkv", "b1"), ".blocks/movie.mkv/b1");

        // A nested target never shares a prefix with its parent
        assert_eq!(s3.staging_dir("movie.mkv/extra"), ".blocks/movie.mkv%2Fextra/");
        assert!(!s3.staging_dir("movie.mkv/extra").starts_with(&s3.staging_dir("movie.mkv")));
    }

    fn staged(s3: &S3Client, target: &str, blocks: &[(&str, i64)]) -> Vec<ObjectMetadata> {
        blocks
            .iter()
            .map(|(id, size)| ObjectMetadata {
                key: s3.block_key(target, id),
                size: *size,
                last_modified: None,
                etag: None,
            })
            .collect()
    }

    #[test]
    fn test_staged_total_sums_listed_blocks() {
        let s3 = client();
        let listing = staged(&s3, "a.bin", &[("b1", 4), ("b2", 6), ("stale", 100)]);
        let ids = vec!["b1".to_string(), "b2".to_string()];

        assert_eq!(s3.staged_total("a.bin", &ids, &listing).unwrap(), 10);
        assert_eq!(s3.staged_total("a.bin", &[], &listing).unwrap(), 0);
    }

    #[test]
    fn test_staged_total_reports_missing_block() {
        let s3 = client();
        let listing = staged(&s3, "a.bin", &[("b1", 4)]);
        let ids = vec!["b1".to_string(), "gone".to_string()];

        let result = s3.staged_total("a.bin", &ids, &listing);
        assert!(matches!(
            result,
            Err(StorageError::BlockNotFound { ref block_id, .. }) if block_id == "gone"
        ));
    }

    #[test]
    fn test_bucket_accessor() {
        assert_eq!(client().bucket(), "uploads");
    }
}
