//! Gallery Storage Library
//!
//! Object storage abstraction for listing images. The `Storage` trait is bucket-aware
//! because drafts, persistent images and variants live in separate namespaces.
//!
//! Backends:
//!
//! - **S3** (`storage-s3`): `object_store` clients, one per bucket
//! - **Local** (`storage-local`): `{root}/{bucket}/{key}` on disk
//! - **Memory** (`storage-memory`): in-process map with POST policy evaluation and
//!   failure injection
//!
//! Browser uploads use SigV4 POST policies built in the `policy` module.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod policy;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use gallery_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::{MemoryStorage, Operation, StoredObject};
pub use policy::{PolicyDocument, PostPolicySigner, SigningCredentials};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{
    ObjectMetadata, PostPolicy, PresignedPost, Storage, StorageError, StorageResult,
};
