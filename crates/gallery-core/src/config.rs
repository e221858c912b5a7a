//! Environment-based configuration.
//!
//! `GalleryConfig::from_env` loads `.env` (if present), reads every section with
//! typed defaults and then validates the result. Nothing here is global: the loaded
//! config is passed to each component at construction.

use crate::models::OutputFormat;
use crate::storage_types::StorageBackend;
use std::env;
use std::time::Duration;

const DEFAULT_REGION: &str = "us-east-1";
const STORAGE_CONNECT_TIMEOUT_SECS: u64 = 5;
const STORAGE_REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_UPLOAD_SIZE_MB: u64 = 5;
const UPLOAD_GRANT_EXPIRY_SECS: u64 = 300;
/// SigV4 POST policies cannot outlive seven days
const MAX_GRANT_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;
const DRAFT_BUCKET: &str = "listings-gallery-draft";
const PERSISTENT_BUCKET: &str = "listings-gallery";
const DEFAULT_CONTENT_TYPES: &str =
    "image/jpeg,image/jpg,image/png,image/webp,image/heic,image/heif";
const BREAKPOINTS: &str = "320,480,768,1024,1200,1920";
const OUTPUT_FORMATS: &str = "webp,avif,jpeg";
const QUALITY: u8 = 85;
const EFFORT: u8 = 4;
const VARIANT_PREFIX: &str = "optimized";
const MAX_CONCURRENT_UPLOADS: usize = 8;
const IMAGE_EXTENSIONS: &str = "jpg,jpeg,png,webp,gif";
const BATCH_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub region: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack). Switches to path-style URLs.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub public_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
}

impl StorageConfig {
    /// Base URL that `{bucket}/{key}` paths are appended to for public links
    pub fn public_base_url(&self) -> String {
        if let Some(public) = &self.public_endpoint {
            return public.trim_end_matches('/').to_string();
        }
        if let Some(endpoint) = &self.endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        format!("https://s3.{}.amazonaws.com", self.region)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            connect_timeout: Duration::from_secs(STORAGE_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(STORAGE_REQUEST_TIMEOUT_SECS),
            public_endpoint: None,
            local_storage_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Lower-cased MIME types clients may request a grant for
    pub allowed_content_types: Vec<String>,
    pub max_file_size_bytes: u64,
    pub grant_expiry_secs: u64,
    pub draft_bucket: String,
    pub persistent_bucket: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: split_lower(DEFAULT_CONTENT_TYPES),
            max_file_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            grant_expiry_secs: UPLOAD_GRANT_EXPIRY_SECS,
            draft_bucket: DRAFT_BUCKET.to_string(),
            persistent_bucket: PERSISTENT_BUCKET.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub breakpoints: Vec<u32>,
    pub formats: Vec<OutputFormat>,
    pub webp_quality: u8,
    /// 0 (fastest) to 6 (slowest), the libwebp `method`
    pub webp_effort: u8,
    pub avif_quality: u8,
    /// 0 (fastest) to 10 (slowest)
    pub avif_effort: u8,
    pub jpeg_quality: u8,
    pub jpeg_progressive: bool,
    pub variant_prefix: String,
    /// Destination bucket for variants; `None` publishes beside the source
    pub variant_bucket: Option<String>,
    pub max_concurrent_uploads: usize,
    /// Source extensions the worker will process
    pub image_extensions: Vec<String>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            breakpoints: vec![320, 480, 768, 1024, 1200, 1920],
            formats: OutputFormat::ALL.to_vec(),
            webp_quality: QUALITY,
            webp_effort: EFFORT,
            avif_quality: QUALITY,
            avif_effort: EFFORT,
            jpeg_quality: QUALITY,
            jpeg_progressive: true,
            variant_prefix: VARIANT_PREFIX.to_string(),
            variant_bucket: None,
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            image_extensions: split_lower(IMAGE_EXTENSIONS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(BATCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GalleryConfig {
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub optimization: OptimizationConfig,
    pub worker: WorkerConfig,
}

fn split_lower(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl GalleryConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. `from_env` passes the process environment.
    pub fn from_lookup<F>(var: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        let storage = StorageConfig {
            backend: storage_backend,
            region: var("S3_REGION")
                .or_else(|| var("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: var("S3_ENDPOINT").filter(|s| !s.is_empty()),
            access_key_id: var("AWS_ACCESS_KEY_ID").filter(|s| !s.is_empty()),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY").filter(|s| !s.is_empty()),
            session_token: var("AWS_SESSION_TOKEN").filter(|s| !s.is_empty()),
            connect_timeout: Duration::from_secs(
                var("STORAGE_CONNECT_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(STORAGE_CONNECT_TIMEOUT_SECS),
            ),
            request_timeout: Duration::from_secs(
                var("STORAGE_REQUEST_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(STORAGE_REQUEST_TIMEOUT_SECS),
            ),
            public_endpoint: var("PUBLIC_ENDPOINT").filter(|s| !s.is_empty()),
            local_storage_path: var("LOCAL_STORAGE_PATH").filter(|s| !s.is_empty()),
        };

        let max_upload_size_mb = var("MAX_UPLOAD_SIZE_MB")
            .unwrap_or_else(|| MAX_UPLOAD_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let upload = UploadConfig {
            allowed_content_types: split_lower(
                &var("ALLOWED_CONTENT_TYPES").unwrap_or_else(|| DEFAULT_CONTENT_TYPES.to_string()),
            ),
            max_file_size_bytes: max_upload_size_mb * 1024 * 1024,
            grant_expiry_secs: var("UPLOAD_GRANT_EXPIRY_SECS")
                .unwrap_or_else(|| UPLOAD_GRANT_EXPIRY_SECS.to_string())
                .parse()
                .unwrap_or(UPLOAD_GRANT_EXPIRY_SECS),
            draft_bucket: var("DRAFT_BUCKET").unwrap_or_else(|| DRAFT_BUCKET.to_string()),
            persistent_bucket: var("PERSISTENT_BUCKET")
                .unwrap_or_else(|| PERSISTENT_BUCKET.to_string()),
        };

        let breakpoints = var("BREAKPOINTS")
            .unwrap_or_else(|| BREAKPOINTS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| anyhow::anyhow!("BREAKPOINTS entry '{}' is not a width", s))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let formats = split_lower(&var("OUTPUT_FORMATS").unwrap_or_else(|| OUTPUT_FORMATS.to_string()))
            .iter()
            .map(|s| s.parse::<OutputFormat>())
            .collect::<Result<Vec<_>, _>>()?;

        let optimization = OptimizationConfig {
            breakpoints,
            formats,
            webp_quality: var("WEBP_QUALITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUALITY),
            webp_effort: var("WEBP_EFFORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(EFFORT),
            avif_quality: var("AVIF_QUALITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUALITY),
            avif_effort: var("AVIF_EFFORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(EFFORT),
            jpeg_quality: var("JPEG_QUALITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUALITY),
            jpeg_progressive: var("JPEG_PROGRESSIVE")
                .unwrap_or_else(|| "true".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(true),
            variant_prefix: var("VARIANT_PREFIX")
                .map(|s| s.trim_matches('/').to_string())
                .unwrap_or_else(|| VARIANT_PREFIX.to_string()),
            variant_bucket: var("VARIANT_BUCKET").filter(|s| !s.is_empty()),
            max_concurrent_uploads: var("MAX_CONCURRENT_UPLOADS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_CONCURRENT_UPLOADS),
            image_extensions: split_lower(
                &var("IMAGE_EXTENSIONS").unwrap_or_else(|| IMAGE_EXTENSIONS.to_string()),
            )
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .collect(),
        };

        let worker = WorkerConfig {
            batch_timeout: Duration::from_secs(
                var("BATCH_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(BATCH_TIMEOUT_SECS),
            ),
        };

        let config = GalleryConfig {
            storage,
            upload,
            optimization,
            worker,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.region.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
                if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some()
                {
                    return Err(anyhow::anyhow!(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {}
        }

        if self.storage.connect_timeout.is_zero() || self.storage.request_timeout.is_zero() {
            return Err(anyhow::anyhow!("Storage timeouts must be greater than zero"));
        }

        let upload = &self.upload;
        if upload.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_CONTENT_TYPES must not be empty"));
        }
        if upload.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than zero"));
        }
        if upload.grant_expiry_secs == 0 || upload.grant_expiry_secs > MAX_GRANT_EXPIRY_SECS {
            return Err(anyhow::anyhow!(
                "UPLOAD_GRANT_EXPIRY_SECS must be between 1 and {}",
                MAX_GRANT_EXPIRY_SECS
            ));
        }
        if upload.draft_bucket.trim().is_empty() || upload.persistent_bucket.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "DRAFT_BUCKET and PERSISTENT_BUCKET must not be empty"
            ));
        }
        if upload.draft_bucket == upload.persistent_bucket {
            return Err(anyhow::anyhow!(
                "DRAFT_BUCKET and PERSISTENT_BUCKET must be different buckets"
            ));
        }

        let optimization = &self.optimization;
        if optimization.breakpoints.is_empty() || optimization.breakpoints.contains(&0) {
            return Err(anyhow::anyhow!(
                "BREAKPOINTS must list at least one non-zero width"
            ));
        }
        if optimization.formats.is_empty() {
            return Err(anyhow::anyhow!("OUTPUT_FORMATS must not be empty"));
        }
        for (name, quality) in [
            ("WEBP_QUALITY", optimization.webp_quality),
            ("AVIF_QUALITY", optimization.avif_quality),
            ("JPEG_QUALITY", optimization.jpeg_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(anyhow::anyhow!("{} must be between 1 and 100", name));
            }
        }
        if optimization.webp_effort > 6 {
            return Err(anyhow::anyhow!("WEBP_EFFORT must be between 0 and 6"));
        }
        if optimization.avif_effort > 10 {
            return Err(anyhow::anyhow!("AVIF_EFFORT must be between 0 and 10"));
        }
        if optimization.variant_prefix.is_empty() {
            return Err(anyhow::anyhow!(
                "VARIANT_PREFIX must not be empty; variants would re-trigger processing"
            ));
        }
        if optimization.max_concurrent_uploads == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT_UPLOADS must be at least 1"));
        }
        if optimization.image_extensions.is_empty() {
            return Err(anyhow::anyhow!("IMAGE_EXTENSIONS must not be empty"));
        }

        if self.worker.batch_timeout.is_zero() {
            return Err(anyhow::anyhow!("BATCH_TIMEOUT_SECS must be greater than zero"));
        }

        Ok(())
    }
}
