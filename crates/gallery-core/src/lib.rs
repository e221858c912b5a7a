//! Gallery Core Library
//!
//! Domain models, error types and configuration shared by every gallery crate:
//! storage keys for draft and persistent listing images, upload grants, variant
//! specifications and the `ImageError` taxonomy.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{GalleryConfig, OptimizationConfig, StorageConfig, UploadConfig, WorkerConfig};
pub use error::{ImageError, ImageResult, VariantFailure};
pub use models::{
    DraftImage, GrantConstraints, ImageOptimizationRequest, ListingId, OutputFormat,
    PersistentImage, PublishedVariant, StoredImage, UploadGrant, UserId, VariantManifest,
    VariantSpec,
};
pub use storage_types::StorageBackend;
