//! Blob storage for route files and trip artifacts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::path::PathBuf;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;
    /// Bucket (or equivalent container) name, embedded in published pointers.
    fn bucket(&self) -> &str;
}

/// Serializes a value to JSON and uploads it with `application/json` content
/// type.
pub async fn put_json(store: &dyn BlobStore, key: &str, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    store.put(key, Bytes::from(body), "application/json").await
}

/// S3-backed blob store.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(config: &aws_config::SdkConfig, bucket: &str) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("GetObject failed for '{key}'"))?;
        let data = resp
            .body
            .collect()
            .await
            .with_context(|| format!("reading object body failed for '{key}'"))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(body.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("PutObject failed for '{key}'"))?;
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Local-directory blob store for CLI runs and tests. Keys map to paths
/// under the root; writes create intermediate directories.
pub struct DirBlobStore {
    root: PathBuf,
    label: String,
}

impl DirBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let label = root.display().to_string();
        Self { root, label }
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(key);
        std::fs::read(&path).with_context(|| format!("unable to read blob '{}'", path.display()))
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("unable to create '{}'", parent.display()))?;
        }
        std::fs::write(&path, &body)
            .with_context(|| format!("unable to write blob '{}'", path.display()))
    }

    fn bucket(&self) -> &str {
        &self.label
    }
}
