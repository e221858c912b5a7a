//! Draft to persistent image lifecycle
//!
//! Promotion is copy-then-delete. The draft is only removed after the copy is
//! confirmed, so a failure at any point leaves at least one readable object.
//! Removing a draft also removes the variants and manifest the pipeline
//! published for it.

use async_trait::async_trait;
use gallery_core::models::manifest_key;
use gallery_core::{
    DraftImage, ImageError, ImageResult, ListingId, OptimizationConfig, OutputFormat,
    PersistentImage, StorageConfig, StoredImage, UploadConfig, VariantSpec,
};
use gallery_storage::{Storage, StorageResult};
use std::sync::Arc;

/// Listing persistence, owned outside this crate
#[async_trait]
pub trait ListingImageRepository: Send + Sync {
    async fn attach(&self, listing_id: &ListingId, image: &PersistentImage) -> ImageResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub image: PersistentImage,
    /// The copy succeeded but the draft or its variants could not be deleted
    pub draft_leaked: bool,
}

pub struct DraftLifecycleManager {
    storage: Arc<dyn Storage>,
    persistent_bucket: String,
    public_base_url: String,
    variant_prefix: String,
    variant_bucket: Option<String>,
    breakpoints: Vec<u32>,
}

impl DraftLifecycleManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        upload: &UploadConfig,
        storage_config: &StorageConfig,
        optimization: &OptimizationConfig,
    ) -> Self {
        Self {
            storage,
            persistent_bucket: upload.persistent_bucket.clone(),
            public_base_url: storage_config.public_base_url(),
            variant_prefix: optimization.variant_prefix.clone(),
            variant_bucket: optimization.variant_bucket.clone(),
            breakpoints: optimization.breakpoints.clone(),
        }
    }

    /// Remove a draft and its published variants. Deleting a draft that is already
    /// gone succeeds.
    #[tracing::instrument(skip(self, draft), fields(bucket = %draft.bucket(), key = %draft.key()))]
    pub async fn delete_draft(&self, draft: &DraftImage) -> ImageResult<()> {
        self.storage
            .delete(draft.bucket(), &draft.key())
            .await
            .map_err(|e| ImageError::StorageUnavailable(e.to_string()))?;

        self.delete_variants(draft)
            .await
            .map_err(|e| ImageError::StorageUnavailable(e.to_string()))?;

        tracing::info!(bucket = %draft.bucket(), key = %draft.key(), "Draft deleted");
        Ok(())
    }

    /// Delete the manifest first, then every key of the breakpoint x format matrix.
    ///
    /// Keys are derived rather than listed; variants written under a breakpoint
    /// that has since been removed from the configuration are not found.
    async fn delete_variants(&self, draft: &DraftImage) -> StorageResult<()> {
        let bucket = self.variant_bucket.as_deref().unwrap_or(draft.bucket());
        let source_key = draft.key();

        let mut keys = vec![manifest_key(&self.variant_prefix, &source_key)];
        for format in OutputFormat::ALL {
            for &width in &self.breakpoints {
                keys.push(VariantSpec::new(width, 0, format).key(&self.variant_prefix, &source_key));
            }
        }

        for key in &keys {
            self.storage.delete(bucket, key).await?;
        }

        tracing::debug!(
            bucket = %bucket,
            source_key = %source_key,
            keys = keys.len(),
            "Draft variants deleted"
        );
        Ok(())
    }

    /// Move a draft into the persistent namespace under `listing_id`.
    #[tracing::instrument(
        skip(self, draft, listing_id),
        fields(draft = %draft.path(), listing_id = %listing_id)
    )]
    pub async fn promote(
        &self,
        draft: &DraftImage,
        listing_id: &ListingId,
    ) -> ImageResult<PromotionOutcome> {
        let start = std::time::Instant::now();
        let image = draft.to_persistent(&self.persistent_bucket, listing_id.clone());
        let draft_key = draft.key();
        let persistent_key = image.key();

        self.storage
            .copy(draft.bucket(), &draft_key, image.bucket(), &persistent_key)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ImageError::DraftNotFound(draft.path())
                } else {
                    tracing::error!(
                        error = %e,
                        from = %draft.path(),
                        to = %image.path(),
                        "Draft copy failed"
                    );
                    ImageError::StorageUnavailable(e.to_string())
                }
            })?;

        let mut draft_leaked = match self.storage.delete(draft.bucket(), &draft_key).await {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    bucket = %draft.bucket(),
                    key = %draft_key,
                    "Draft left behind after promotion"
                );
                true
            }
        };

        if let Err(e) = self.delete_variants(draft).await {
            tracing::warn!(
                error = %e,
                key = %draft_key,
                "Draft variants left behind after promotion"
            );
            draft_leaked = true;
        }

        tracing::info!(
            from = %draft.path(),
            to = %image.path(),
            draft_leaked,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Draft promoted"
        );

        Ok(PromotionOutcome {
            image,
            draft_leaked,
        })
    }

    /// Promote the draft and attach the result to the listing.
    ///
    /// An attach failure is returned as-is; the image stays in the persistent bucket.
    pub async fn publish_to_listing(
        &self,
        draft: &DraftImage,
        listing_id: &ListingId,
        repository: &dyn ListingImageRepository,
    ) -> ImageResult<PromotionOutcome> {
        let outcome = self.promote(draft, listing_id).await?;
        repository.attach(listing_id, &outcome.image).await?;
        Ok(outcome)
    }

    pub fn image_url(&self, image: &StoredImage) -> String {
        format!("{}/{}", self.public_base_url, image.path())
    }
}
