//! Responsive variant pipeline
//!
//! One source image moves through
//! `Received -> Downloaded -> MetadataExtracted -> Compressing(i) -> Published -> Done`.
//! Encoding is serial on the blocking pool against a single decoded copy of the
//! source; every encoded variant is handed to an upload task straight away and
//! uploads run concurrently, bounded by a semaphore.

use crate::compression::{EncoderSettings, ImageCompressor, VariantEncoder};
use crate::metadata::{self, ImageMetadata};
use crate::planner::VariantPlanner;
use async_trait::async_trait;
use bytes::Bytes;
use gallery_core::models::{manifest_key, variant_base};
use gallery_core::{
    ImageError, ImageOptimizationRequest, ImageResult, OptimizationConfig, PublishedVariant,
    VariantFailure, VariantManifest, VariantSpec,
};
use gallery_storage::{ObjectMetadata, Storage};
use image::{DynamicImage, ImageReader};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Lifecycle stage of one pipeline run, reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Downloaded,
    MetadataExtracted,
    Compressing(usize),
    Published,
    Done,
    Errored(&'static str),
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Received => write!(f, "received"),
            PipelineStage::Downloaded => write!(f, "downloaded"),
            PipelineStage::MetadataExtracted => write!(f, "metadata_extracted"),
            PipelineStage::Compressing(index) => write!(f, "compressing({})", index),
            PipelineStage::Published => write!(f, "published"),
            PipelineStage::Done => write!(f, "done"),
            PipelineStage::Errored(reason) => write!(f, "errored({})", reason),
        }
    }
}

/// Result of a fully successful run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub manifest_key: String,
    pub manifest: VariantManifest,
}

/// Seam between event ingestion and the variant pipeline
#[async_trait]
pub trait ImageOptimizer: Send + Sync {
    async fn optimize(&self, request: &ImageOptimizationRequest) -> ImageResult<PipelineOutcome>;
}

pub struct VariantPipeline {
    storage: Arc<dyn Storage>,
    encoder: Arc<dyn VariantEncoder>,
    config: OptimizationConfig,
    settings: EncoderSettings,
    upload_permits: Arc<Semaphore>,
}

type UploadResult = Result<(usize, PublishedVariant), (usize, VariantFailure)>;

impl VariantPipeline {
    pub fn new(storage: Arc<dyn Storage>, config: OptimizationConfig) -> Self {
        let settings = EncoderSettings::from(&config);
        let upload_permits = Arc::new(Semaphore::new(config.max_concurrent_uploads.max(1)));
        Self {
            storage,
            encoder: Arc::new(ImageCompressor),
            config,
            settings,
            upload_permits,
        }
    }

    /// Replace the default resize-and-compress encoder
    pub fn with_encoder(mut self, encoder: Arc<dyn VariantEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Produce and publish every variant of the requested source.
    ///
    /// Returns `PartialVariantFailure` (and writes no manifest) if any variant failed;
    /// variants that did succeed stay published.
    #[tracing::instrument(
        skip(self, request),
        fields(bucket = %request.source_bucket, key = %request.source_object_key)
    )]
    pub async fn run(&self, request: &ImageOptimizationRequest) -> ImageResult<PipelineOutcome> {
        let result = self.execute(request).await;
        if let Err(e) = &result {
            tracing::warn!(
                stage = %PipelineStage::Errored(e.reason()),
                error = %e,
                recoverable = e.is_recoverable(),
                "Variant pipeline failed"
            );
        }
        result
    }

    async fn execute(&self, request: &ImageOptimizationRequest) -> ImageResult<PipelineOutcome> {
        let start = std::time::Instant::now();

        // Requests can be built without validation; never encode a disabled format.
        if let Some(format) = request
            .requested_formats
            .iter()
            .find(|&format| !self.config.formats.contains(format))
        {
            return Err(ImageError::UnsupportedFormat(format.to_string()));
        }

        let source_bucket = request.source_bucket.as_str();
        let source_key = request.source_object_key.as_str();
        let variant_bucket = self
            .config
            .variant_bucket
            .clone()
            .unwrap_or_else(|| source_bucket.to_string());

        tracing::debug!(stage = %PipelineStage::Received, "Variant pipeline started");

        let data = self
            .storage
            .get(source_bucket, source_key)
            .await
            .map_err(|e| ImageError::DownloadFailed {
                bucket: source_bucket.to_string(),
                key: source_key.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(
            stage = %PipelineStage::Downloaded,
            size_bytes = data.len() as u64,
            "Source downloaded"
        );

        let metadata = metadata::probe(&data).map_err(|e| ImageError::InvalidImage {
            key: source_key.to_string(),
            message: e.to_string(),
        })?;

        tracing::debug!(
            stage = %PipelineStage::MetadataExtracted,
            width = metadata.width,
            height = metadata.height,
            format = %metadata.format,
            "Source metadata extracted"
        );

        let source = Arc::new(Self::decode(data, source_key).await?);

        let formats = if request.requested_formats.is_empty() {
            self.config.formats.as_slice()
        } else {
            request.requested_formats.as_slice()
        };
        let specs = VariantPlanner::plan(metadata.aspect_ratio(), &self.config.breakpoints, formats);

        let mut uploads: JoinSet<UploadResult> = JoinSet::new();
        let mut pending: HashMap<usize, &VariantSpec> = HashMap::with_capacity(specs.len());
        let mut failures: Vec<(usize, VariantFailure)> = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            tracing::debug!(
                stage = %PipelineStage::Compressing(index),
                variant = %spec.size_name,
                format = %spec.format,
                "Encoding variant"
            );

            let encoded = self.encode(Arc::clone(&source), spec).await;
            let data = match encoded {
                Ok(data) => data,
                Err(cause) => {
                    failures.push((index, Self::failure(source_key, spec, cause)));
                    continue;
                }
            };

            let permit = match Arc::clone(&self.upload_permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    failures.push((index, Self::failure(source_key, spec, e.to_string())));
                    continue;
                }
            };

            let storage = Arc::clone(&self.storage);
            let bucket = variant_bucket.clone();
            let key = spec.key(&self.config.variant_prefix, source_key);
            let source_key_owned = source_key.to_string();
            let spec_owned = spec.clone();
            pending.insert(index, spec);

            uploads.spawn(async move {
                let _permit = permit;
                let size_bytes = data.len() as u64;
                let content_type = spec_owned.format.content_type();
                let mut object_metadata = ObjectMetadata::new();
                object_metadata.insert("source-key".to_string(), source_key_owned.clone());

                match storage
                    .put(&bucket, &key, data, content_type, &object_metadata)
                    .await
                {
                    Ok(()) => Ok((
                        index,
                        PublishedVariant {
                            size_name: spec_owned.size_name,
                            width: spec_owned.width,
                            height: spec_owned.height,
                            format: spec_owned.format,
                            key,
                            content_type: content_type.to_string(),
                            bytes: size_bytes,
                        },
                    )),
                    Err(e) => Err((
                        index,
                        VariantFailure {
                            source_key: source_key_owned,
                            size_name: spec_owned.size_name,
                            format: spec_owned.format,
                            cause: e.to_string(),
                        },
                    )),
                }
            });
        }

        // Only uploads are left; the decoded source is no longer needed.
        drop(source);

        let mut published: Vec<(usize, PublishedVariant)> = Vec::with_capacity(specs.len());
        while let Some(joined) = uploads.join_next().await {
            match joined {
                Ok(Ok((index, variant))) => {
                    pending.remove(&index);
                    published.push((index, variant));
                }
                Ok(Err((index, failure))) => {
                    pending.remove(&index);
                    failures.push((index, failure));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Variant upload task aborted");
                }
            }
        }
        // Tasks that panicked never reported back.
        for (index, spec) in pending {
            failures.push((index, Self::failure(source_key, spec, "upload task aborted")));
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(index, _)| *index);
            for (_, failure) in &failures {
                tracing::warn!(
                    source_key = %failure.source_key,
                    variant = %failure.size_name,
                    format = %failure.format,
                    cause = %failure.cause,
                    "Variant failed"
                );
            }
            return Err(ImageError::PartialVariantFailure {
                source_key: source_key.to_string(),
                failures: failures.into_iter().map(|(_, f)| f).collect(),
                attempted: specs.len(),
            });
        }

        published.sort_by_key(|(index, _)| *index);
        tracing::debug!(
            stage = %PipelineStage::Published,
            variants = published.len(),
            "All variants published"
        );

        let outcome = self
            .write_manifest(
                &variant_bucket,
                source_bucket,
                source_key,
                &metadata,
                published.into_iter().map(|(_, v)| v).collect(),
            )
            .await?;

        tracing::info!(
            stage = %PipelineStage::Done,
            variants = outcome.manifest.variants.len(),
            base = %variant_base(&self.config.variant_prefix, source_key),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Variant pipeline finished"
        );

        Ok(outcome)
    }

    async fn decode(data: Bytes, source_key: &str) -> ImageResult<DynamicImage> {
        let invalid = |message: String| ImageError::InvalidImage {
            key: source_key.to_string(),
            message,
        };

        tokio::task::spawn_blocking(move || -> anyhow::Result<DynamicImage> {
            let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
            Ok(reader.decode()?)
        })
        .await
        .map_err(|e| invalid(format!("decoder task failed: {}", e)))?
        .map_err(|e| invalid(e.to_string()))
    }

    async fn encode(&self, source: Arc<DynamicImage>, spec: &VariantSpec) -> Result<Bytes, String> {
        let settings = self.settings;
        let encoder = Arc::clone(&self.encoder);
        let spec = spec.clone();

        let task = tokio::task::spawn_blocking(move || encoder.encode(&source, &spec, &settings));
        match task.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err(format!("encoder panicked: {}", e)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn failure(source_key: &str, spec: &VariantSpec, cause: impl Into<String>) -> VariantFailure {
        VariantFailure {
            source_key: source_key.to_string(),
            size_name: spec.size_name.clone(),
            format: spec.format,
            cause: cause.into(),
        }
    }

    async fn write_manifest(
        &self,
        variant_bucket: &str,
        source_bucket: &str,
        source_key: &str,
        metadata: &ImageMetadata,
        variants: Vec<PublishedVariant>,
    ) -> ImageResult<PipelineOutcome> {
        let manifest = VariantManifest {
            source_bucket: source_bucket.to_string(),
            source_key: source_key.to_string(),
            source_width: metadata.width,
            source_height: metadata.height,
            variants,
        };
        let key = manifest_key(&self.config.variant_prefix, source_key);
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ImageError::StorageUnavailable(format!("manifest encoding: {}", e)))?;

        self.storage
            .put(
                variant_bucket,
                &key,
                Bytes::from(body),
                "application/json",
                &ObjectMetadata::new(),
            )
            .await
            .map_err(|e| ImageError::StorageUnavailable(e.to_string()))?;

        Ok(PipelineOutcome {
            manifest_key: key,
            manifest,
        })
    }
}

#[async_trait]
impl ImageOptimizer for VariantPipeline {
    async fn optimize(&self, request: &ImageOptimizationRequest) -> ImageResult<PipelineOutcome> {
        self.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallery_core::OutputFormat;
    use gallery_storage::{
        MemoryStorage, Operation, PostPolicy, PresignedPost, StorageBackend, StorageResult,
    };
    use image::{ImageFormat, Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Memory storage whose puts take a while and record how many overlap
    struct SlowStorage {
        inner: MemoryStorage,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowStorage {
        fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryStorage::new(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Storage for SlowStorage {
        async fn presigned_post(
            &self,
            bucket: &str,
            key: &str,
            policy: &PostPolicy,
        ) -> StorageResult<PresignedPost> {
            self.inner.presigned_post(bucket, key, policy).await
        }

        async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
            self.inner.get(bucket, key).await
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            data: Bytes,
            content_type: &str,
            metadata: &ObjectMetadata,
        ) -> StorageResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let result = self.inner.put(bucket, key, data, content_type, metadata).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn copy(
            &self,
            src_bucket: &str,
            src_key: &str,
            dst_bucket: &str,
            dst_key: &str,
        ) -> StorageResult<()> {
            self.inner.copy(src_bucket, src_key, dst_bucket, dst_key).await
        }

        async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
            self.inner.delete(bucket, key).await
        }

        async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
            self.inner.exists(bucket, key).await
        }

        fn backend_type(&self) -> StorageBackend {
            self.inner.backend_type()
        }
    }

    /// Cheap encoder that records overlap and fails one chosen variant
    #[derive(Default)]
    struct ScriptedEncoder {
        fail: Option<(String, OutputFormat)>,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl VariantEncoder for ScriptedEncoder {
        fn encode(
            &self,
            _source: &DynamicImage,
            spec: &VariantSpec,
            _settings: &EncoderSettings,
        ) -> anyhow::Result<Bytes> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.active.fetch_sub(1, Ordering::SeqCst);

            match &self.fail {
                Some((size_name, format)) if *size_name == spec.size_name && *format == spec.format => {
                    Err(anyhow::anyhow!("encoder rejected {}", spec.size_name))
                }
                _ => Ok(Bytes::from(format!("{}.{}", spec.size_name, spec.format))),
            }
        }
    }

    fn jpeg_source(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        }));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
        buffer.into_inner()
    }

    fn config(breakpoints: Vec<u32>, formats: Vec<OutputFormat>) -> OptimizationConfig {
        OptimizationConfig {
            breakpoints,
            formats,
            max_concurrent_uploads: 2,
            ..OptimizationConfig::default()
        }
    }

    fn request(formats: Vec<OutputFormat>) -> ImageOptimizationRequest {
        ImageOptimizationRequest {
            source_bucket: "drafts".to_string(),
            source_object_key: "user-1/photo.jpg".to_string(),
            requested_formats: formats,
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(PipelineStage::Compressing(3).to_string(), "compressing(3)");
        assert_eq!(
            PipelineStage::Errored("invalid_image").to_string(),
            "errored(invalid_image)"
        );
    }

    #[tokio::test]
    async fn test_publishes_every_variant_and_manifest() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", jpeg_source(160, 90), "image/jpeg");

        let pipeline = VariantPipeline::new(
            storage.clone(),
            config(vec![32, 64], vec![OutputFormat::Webp, OutputFormat::Jpeg]),
        );
        let outcome = pipeline.run(&request(vec![])).await.unwrap();

        assert_eq!(outcome.manifest_key, "optimized/user-1/photo/manifest.json");
        assert_eq!(outcome.manifest.source_width, 160);
        let keys: Vec<&str> = outcome.manifest.variants.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "optimized/user-1/photo/32w.webp",
                "optimized/user-1/photo/64w.webp",
                "optimized/user-1/photo/32w.jpg",
                "optimized/user-1/photo/64w.jpg",
            ]
        );
        assert_eq!(outcome.manifest.variants[0].height, 18);

        let stored = storage.object("drafts", "optimized/user-1/photo/64w.jpg").unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(stored.metadata.get("source-key").unwrap(), "user-1/photo.jpg");
        let decoded = image::load_from_memory(&stored.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 36));

        assert!(storage
            .object("drafts", "optimized/user-1/photo/manifest.json")
            .is_some());
    }

    #[tokio::test]
    async fn test_requested_formats_override_defaults() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", jpeg_source(100, 100), "image/jpeg");

        let pipeline = VariantPipeline::new(
            storage.clone(),
            config(vec![50], vec![OutputFormat::Webp, OutputFormat::Jpeg]),
        );
        let outcome = pipeline.run(&request(vec![OutputFormat::Jpeg])).await.unwrap();
        assert_eq!(outcome.manifest.variants.len(), 1);
        assert_eq!(outcome.manifest.variants[0].format, OutputFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_variant_bucket_override() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", jpeg_source(64, 64), "image/jpeg");

        let mut cfg = config(vec![32], vec![OutputFormat::Jpeg]);
        cfg.variant_bucket = Some("variants".to_string());
        VariantPipeline::new(storage.clone(), cfg)
            .run(&request(vec![]))
            .await
            .unwrap();

        assert_eq!(
            storage.keys("variants"),
            vec!["optimized/user-1/photo/32w.jpg", "optimized/user-1/photo/manifest.json"]
        );
    }

    #[tokio::test]
    async fn test_failed_upload_reports_partial_failure_without_manifest() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", jpeg_source(160, 90), "image/jpeg");
        storage.fail_on(Operation::Put, "64w.webp");

        let pipeline = VariantPipeline::new(
            storage.clone(),
            config(vec![32, 64], vec![OutputFormat::Webp, OutputFormat::Jpeg]),
        );
        let err = pipeline.run(&request(vec![])).await.unwrap_err();

        match err {
            ImageError::PartialVariantFailure {
                source_key,
                failures,
                attempted,
            } => {
                assert_eq!(source_key, "user-1/photo.jpg");
                assert_eq!(attempted, 4);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].size_name, "64w");
                assert_eq!(failures[0].format, OutputFormat::Webp);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(storage
            .object("drafts", "optimized/user-1/photo/manifest.json")
            .is_none());
        assert!(storage
            .object("drafts", "optimized/user-1/photo/32w.jpg")
            .is_some());
    }

    #[tokio::test]
    async fn test_uploads_overlap_up_to_the_configured_ceiling() {
        let storage = Arc::new(SlowStorage::new(Duration::from_millis(50)));
        storage
            .inner
            .insert("drafts", "user-1/photo.jpg", jpeg_source(160, 90), "image/jpeg");
        let encoder = Arc::new(ScriptedEncoder::default());

        let cfg = config(vec![32, 64, 128], vec![OutputFormat::Webp, OutputFormat::Jpeg]);
        assert_eq!(cfg.max_concurrent_uploads, 2);
        let outcome = VariantPipeline::new(storage.clone(), cfg)
            .with_encoder(encoder.clone())
            .run(&request(vec![]))
            .await
            .unwrap();

        assert_eq!(outcome.manifest.variants.len(), 6);
        let peak = storage.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "uploads never overlapped");
        assert!(peak <= 2, "{} uploads in flight with a ceiling of 2", peak);
        assert_eq!(storage.in_flight.load(Ordering::SeqCst), 0);

        assert_eq!(encoder.calls.load(Ordering::SeqCst), 6);
        assert_eq!(encoder.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_encode_failure_keeps_sibling_variants() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", jpeg_source(160, 90), "image/jpeg");
        let encoder = Arc::new(ScriptedEncoder {
            fail: Some(("32w".to_string(), OutputFormat::Webp)),
            ..ScriptedEncoder::default()
        });

        let err = VariantPipeline::new(
            storage.clone(),
            config(vec![32, 64], vec![OutputFormat::Webp, OutputFormat::Jpeg]),
        )
        .with_encoder(encoder)
        .run(&request(vec![]))
        .await
        .unwrap_err();

        match err {
            ImageError::PartialVariantFailure {
                failures,
                attempted,
                ..
            } => {
                assert_eq!(attempted, 4);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].size_name, "32w");
                assert_eq!(failures[0].format, OutputFormat::Webp);
                assert!(failures[0].cause.contains("encoder rejected 32w"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(
            storage.keys("drafts"),
            vec![
                "optimized/user-1/photo/32w.jpg",
                "optimized/user-1/photo/64w.jpg",
                "optimized/user-1/photo/64w.webp",
                "user-1/photo.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn test_format_outside_configuration_is_rejected_before_download() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", jpeg_source(64, 64), "image/jpeg");
        let pipeline = VariantPipeline::new(storage.clone(), config(vec![32], vec![OutputFormat::Jpeg]));

        // built directly, bypassing ImageOptimizationRequest::new
        let unchecked = ImageOptimizationRequest {
            source_bucket: "drafts".to_string(),
            source_object_key: "user-1/photo.jpg".to_string(),
            requested_formats: vec![OutputFormat::Jpeg, OutputFormat::Avif],
        };
        let err = pipeline.run(&unchecked).await.unwrap_err();

        assert!(matches!(err, ImageError::UnsupportedFormat(ref f) if f == "avif"));
        assert_eq!(storage.call_count(Operation::Get), 0);
        assert_eq!(storage.call_count(Operation::Put), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_download_failure() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = VariantPipeline::new(storage, config(vec![32], vec![OutputFormat::Jpeg]));

        let err = pipeline.run(&request(vec![])).await.unwrap_err();
        assert_eq!(err.reason(), "download_failed");
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_undecodable_source_is_invalid_image() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("drafts", "user-1/photo.jpg", &b"not an image"[..], "image/jpeg");
        let pipeline = VariantPipeline::new(storage.clone(), config(vec![32], vec![OutputFormat::Jpeg]));

        let err = pipeline.run(&request(vec![])).await.unwrap_err();
        assert_eq!(err.reason(), "invalid_image");
        assert!(!err.is_recoverable());
        assert_eq!(storage.call_count(Operation::Put), 0);
    }
}
