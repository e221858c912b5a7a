//! Responsive variant models.
//!
//! A source image at `{dir}/{stem}.{ext}` publishes its variants under
//! `{prefix}/{dir}/{stem}/`, one object per `{size_name}.{format_ext}` plus a
//! `manifest.json` written once every variant is in place.

use crate::error::ImageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Encoded output format of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Avif,
    Jpeg,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Webp, OutputFormat::Avif, OutputFormat::Jpeg];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            _ => Err(ImageError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Webp => write!(f, "webp"),
            OutputFormat::Avif => write!(f, "avif"),
            OutputFormat::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// One cell of the size x format matrix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSpec {
    pub size_name: String,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

impl VariantSpec {
    pub fn new(width: u32, height: u32, format: OutputFormat) -> Self {
        Self {
            size_name: format!("{}w", width),
            width,
            height,
            format,
        }
    }

    /// Storage key this variant is published under for `source_key`
    pub fn key(&self, variant_prefix: &str, source_key: &str) -> String {
        format!(
            "{}/{}.{}",
            variant_base(variant_prefix, source_key),
            self.size_name,
            self.format.extension()
        )
    }
}

/// `{prefix}/{source_dir}/{source_stem}` without a trailing slash
pub fn variant_base(variant_prefix: &str, source_key: &str) -> String {
    let prefix = variant_prefix.trim_matches('/');
    let (dir, file) = match source_key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, source_key),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };

    let mut base = String::with_capacity(prefix.len() + source_key.len() + 2);
    if !prefix.is_empty() {
        base.push_str(prefix);
        base.push('/');
    }
    if let Some(dir) = dir.filter(|dir| !dir.is_empty()) {
        base.push_str(dir);
        base.push('/');
    }
    base.push_str(stem);
    base
}

pub fn manifest_key(variant_prefix: &str, source_key: &str) -> String {
    format!(
        "{}/{}",
        variant_base(variant_prefix, source_key),
        MANIFEST_FILE_NAME
    )
}

/// True when `key` has the exact shape the pipeline writes:
/// `{prefix}/{dir...}/{stem}/{N}w.{ext}` or `{prefix}/{dir...}/{stem}/manifest.json`.
///
/// A bare prefix match is not enough: a user whose id equals the prefix uploads
/// drafts to `{prefix}/{uuid}.{ext}`, and those must still be processed.
pub fn is_variant_key(variant_prefix: &str, key: &str) -> bool {
    let prefix = variant_prefix.trim_matches('/');
    if prefix.is_empty() {
        return false;
    }
    let Some(rest) = key
        .trim_start_matches('/')
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return false;
    };
    let Some((base, file)) = rest.rsplit_once('/') else {
        return false;
    };
    if base.is_empty() || base.split('/').any(str::is_empty) {
        return false;
    }
    file == MANIFEST_FILE_NAME || is_variant_file_name(file)
}

/// `{N}w.{ext}` for a known output extension
fn is_variant_file_name(file: &str) -> bool {
    let Some((size_name, ext)) = file.rsplit_once('.') else {
        return false;
    };
    let Some(width) = size_name.strip_suffix('w') else {
        return false;
    };
    !width.is_empty()
        && width.bytes().all(|b| b.is_ascii_digit())
        && OutputFormat::ALL.iter().any(|f| f.extension() == ext)
}

/// A variant that has been uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedVariant {
    pub size_name: String,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub key: String,
    pub content_type: String,
    pub bytes: u64,
}

/// Completion marker listing every published variant of one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantManifest {
    pub source_bucket: String,
    pub source_key: String,
    pub source_width: u32,
    pub source_height: u32,
    pub variants: Vec<PublishedVariant>,
}

/// Request to derive the variant matrix for one stored source image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOptimizationRequest {
    pub source_bucket: String,
    pub source_object_key: String,
    pub requested_formats: Vec<OutputFormat>,
}

impl ImageOptimizationRequest {
    /// Build a request, rejecting any format outside `supported`.
    pub fn new(
        source_bucket: impl Into<String>,
        source_object_key: impl Into<String>,
        requested_formats: Vec<OutputFormat>,
        supported: &[OutputFormat],
    ) -> Result<Self, ImageError> {
        if let Some(format) = requested_formats.iter().find(|f| !supported.contains(f)) {
            return Err(ImageError::UnsupportedFormat(format.to_string()));
        }
        Ok(Self {
            source_bucket: source_bucket.into(),
            source_object_key: source_object_key.into(),
            requested_formats,
        })
    }

    /// Parse format names from an inbound message, then validate as in [`Self::new`].
    pub fn from_names(
        source_bucket: impl Into<String>,
        source_object_key: impl Into<String>,
        names: &[String],
        supported: &[OutputFormat],
    ) -> Result<Self, ImageError> {
        let formats = names
            .iter()
            .map(|name| name.parse::<OutputFormat>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(source_bucket, source_object_key, formats, supported)
    }
}
