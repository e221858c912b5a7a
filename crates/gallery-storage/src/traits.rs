//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.
//! Every operation names its bucket explicitly: drafts, persistent images and
//! published variants can each live in a different bucket.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// User metadata attached to an object on `put`
pub type ObjectMetadata = HashMap<String, String>;

/// Conditions a browser-based POST upload must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPolicy {
    pub expires_in: Duration,
    /// Inclusive `content-length-range` bounds in bytes
    pub min_content_length: u64,
    pub max_content_length: u64,
}

/// A signed POST form: submit `fields` (in order) then the file to `url`
#[derive(Debug, Clone)]
pub struct PresignedPost {
    pub url: String,
    pub fields: Vec<(String, String)>,
    pub expires_at: DateTime<Utc>,
}

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem, in-memory) implement this trait so the
/// services and the variant pipeline can be wired to any of them through
/// `Arc<dyn Storage>`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Sign a POST policy allowing a client to upload exactly `key` into `bucket`.
    ///
    /// Only supported by backends that can enforce a policy; others return a `ConfigError`.
    async fn presigned_post(
        &self,
        bucket: &str,
        key: &str,
        policy: &PostPolicy,
    ) -> StorageResult<PresignedPost>;

    /// Download a whole object
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Write an object, replacing any existing one
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()>;

    /// Copy an object, possibly across buckets. A missing source is `NotFound`.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
