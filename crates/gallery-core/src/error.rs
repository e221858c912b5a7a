//! Error types module
//!
//! `ImageError` is the single error type returned by the gallery services, the
//! variant pipeline and the event worker. Storage backends have their own
//! `StorageError` which is mapped into `ImageError` at the service boundary.
//!
//! Every variant self-describes whether retrying can help (`is_recoverable`) so the
//! worker can log unrecoverable failures distinctly before the batch is redelivered.

use crate::models::OutputFormat;
use std::fmt;

pub type ImageResult<T> = Result<T, ImageError>;

/// One variant that could not be produced or published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantFailure {
    pub source_key: String,
    pub size_name: String,
    pub format: OutputFormat,
    pub cause: String,
}

impl fmt::Display for VariantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.source_key, self.size_name, self.format, self.cause
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Draft not found: {0}")]
    DraftNotFound(String),

    #[error("Failed to download {bucket}/{key}: {message}")]
    DownloadFailed {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Invalid image {key}: {message}")]
    InvalidImage { key: String, message: String },

    #[error("{} of {attempted} variants failed for {source_key}", failures.len())]
    PartialVariantFailure {
        source_key: String,
        failures: Vec<VariantFailure>,
        attempted: usize,
    },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("{failed} record(s) failed, {processed} processed; first failure: {first}")]
    BatchPartialFailure {
        failed: usize,
        processed: usize,
        first: Box<ImageError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ImageError {
    /// Machine-readable error code (e.g. "DRAFT_NOT_FOUND")
    pub fn error_code(&self) -> &'static str {
        match self {
            ImageError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ImageError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ImageError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            ImageError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            ImageError::DraftNotFound(_) => "DRAFT_NOT_FOUND",
            ImageError::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            ImageError::InvalidImage { .. } => "INVALID_IMAGE",
            ImageError::PartialVariantFailure { .. } => "PARTIAL_VARIANT_FAILURE",
            ImageError::MalformedEvent(_) => "MALFORMED_EVENT",
            ImageError::BatchPartialFailure { .. } => "BATCH_PARTIAL_FAILURE",
            ImageError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Short lowercase reason used as the `reason` field in logs
    pub fn reason(&self) -> &'static str {
        match self {
            ImageError::UnsupportedMediaType(_) => "unsupported_media_type",
            ImageError::UnsupportedFormat(_) => "unsupported_format",
            ImageError::InvalidIdentifier { .. } => "invalid_identifier",
            ImageError::StorageUnavailable(_) => "storage_unavailable",
            ImageError::DraftNotFound(_) => "draft_not_found",
            ImageError::DownloadFailed { .. } => "download_failed",
            ImageError::InvalidImage { .. } => "invalid_image",
            ImageError::PartialVariantFailure { .. } => "partial_variant_failure",
            ImageError::MalformedEvent(_) => "malformed_event",
            ImageError::BatchPartialFailure { .. } => "batch_partial_failure",
            ImageError::Config(_) => "config",
        }
    }

    /// Whether redelivering the same input could succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ImageError::InvalidImage { .. }
            | ImageError::UnsupportedMediaType(_)
            | ImageError::UnsupportedFormat(_)
            | ImageError::InvalidIdentifier { .. }
            | ImageError::MalformedEvent(_)
            | ImageError::DraftNotFound(_)
            | ImageError::Config(_) => false,
            ImageError::StorageUnavailable(_)
            | ImageError::DownloadFailed { .. }
            | ImageError::PartialVariantFailure { .. } => true,
            ImageError::BatchPartialFailure { first, .. } => first.is_recoverable(),
        }
    }
}

impl From<serde_json::Error> for ImageError {
    fn from(err: serde_json::Error) -> Self {
        ImageError::MalformedEvent(format!("JSON parsing error: {}", err))
    }
}
