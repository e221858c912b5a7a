//! In-memory storage backend
//!
//! Keeps objects in a `HashMap` keyed by `(bucket, key)`. Besides the `Storage`
//! contract it can simulate a browser POST against a signed policy and inject
//! failures per operation, which is what the service and worker tests build on.

use crate::policy::{form_field, PolicyDocument, PostPolicySigner, SigningCredentials};
use crate::traits::{
    ObjectMetadata, PostPolicy, PresignedPost, Storage, StorageError, StorageResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const MEMORY_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

/// Storage operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PresignedPost,
    Get,
    Put,
    Copy,
    Delete,
    Exists,
}

#[derive(Debug)]
struct InjectedFailure {
    operation: Operation,
    key_fragment: String,
    /// `None` fails every matching call
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    failures: Vec<InjectedFailure>,
    calls: HashMap<Operation, usize>,
}

pub struct MemoryStorage {
    state: Mutex<State>,
    signer: PostPolicySigner,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            signer: PostPolicySigner::new(
                MEMORY_REGION,
                SigningCredentials {
                    access_key_id: "memory-access-key".to_string(),
                    secret_access_key: "memory-secret-key".to_string(),
                    session_token: None,
                },
            ),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and return the injected error, if one matches
    fn check(&self, operation: Operation, key: &str) -> StorageResult<()> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;

        let position = state
            .failures
            .iter()
            .position(|f| f.operation == operation && key.contains(f.key_fragment.as_str()));
        let Some(index) = position else {
            return Ok(());
        };

        let failure = &mut state.failures[index];
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                state.failures.remove(index);
            }
        }

        let message = format!("injected {:?} failure for {}", operation, key);
        Err(match operation {
            Operation::Get => StorageError::DownloadFailed(message),
            Operation::Put => StorageError::UploadFailed(message),
            Operation::Copy => StorageError::CopyFailed(message),
            Operation::Delete => StorageError::DeleteFailed(message),
            Operation::PresignedPost | Operation::Exists => StorageError::BackendError(message),
        })
    }

    /// Fail every `operation` whose key contains `key_fragment` (empty matches all)
    pub fn fail_on(&self, operation: Operation, key_fragment: impl Into<String>) {
        self.state().failures.push(InjectedFailure {
            operation,
            key_fragment: key_fragment.into(),
            remaining: None,
        });
    }

    /// Fail only the next matching `operation`
    pub fn fail_once(&self, operation: Operation, key_fragment: impl Into<String>) {
        self.state().failures.push(InjectedFailure {
            operation,
            key_fragment: key_fragment.into(),
            remaining: Some(1),
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Seed an object directly, bypassing failure injection
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>, content_type: &str) {
        self.state().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
                metadata: ObjectMetadata::new(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Sorted keys currently stored in `bucket`
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Simulate a client submitting a presigned POST form with `body` as the file.
    pub fn simulate_post(
        &self,
        bucket: &str,
        fields: &[(String, String)],
        body: Bytes,
    ) -> StorageResult<()> {
        self.simulate_post_at(bucket, fields, body, Utc::now())
    }

    pub fn simulate_post_at(
        &self,
        bucket: &str,
        fields: &[(String, String)],
        body: Bytes,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.signer.verify(fields)?;

        let policy = form_field(fields, "policy")
            .ok_or_else(|| StorageError::AccessDenied("missing Policy field".to_string()))?;
        let document = PolicyDocument::decode(policy)?;
        document.evaluate(bucket, fields, body.len() as u64, now)?;

        let key = form_field(fields, "key")
            .ok_or_else(|| StorageError::AccessDenied("missing key field".to_string()))?;
        let content_type =
            form_field(fields, "content-type").unwrap_or("application/octet-stream");

        self.insert(bucket, key, body, content_type);
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn presigned_post(
        &self,
        bucket: &str,
        key: &str,
        policy: &PostPolicy,
    ) -> StorageResult<PresignedPost> {
        self.check(Operation::PresignedPost, key)?;
        self.signer
            .sign(format!("memory://{}", bucket), bucket, key, policy, Utc::now())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.check(Operation::Get, key)?;
        self.object(bucket, key)
            .map(|object| object.data)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        self.check(Operation::Put, key)?;
        self.state().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        self.check(Operation::Copy, src_key)?;
        let mut state = self.state();
        let object = state
            .objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", src_bucket, src_key)))?;
        state
            .objects
            .insert((dst_bucket.to_string(), dst_key.to_string()), object);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.check(Operation::Delete, key)?;
        self.state()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        self.check(Operation::Exists, key)?;
        Ok(self.object(bucket, key).is_some())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
