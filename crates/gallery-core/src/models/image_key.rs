//! Storage keys for listing images.
//!
//! Key layout:
//!
//! - **Draft**: `{user_id}/{file_name}` in the draft bucket
//! - **Persistent**: `{user_id}/{listing_id}/{file_name}` in the persistent bucket
//!
//! A path is always `{bucket}/{key}`. Identifiers and file names are validated to a
//! single path segment so one user's keys can never alias another user's or listing's.

use crate::error::ImageError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate_segment(kind: &'static str, value: &str) -> Result<(), ImageError> {
    let invalid = |reason: &str| ImageError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > 255 {
        return Err(invalid("must be at most 255 bytes"));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    if value == "." || value.contains("..") {
        return Err(invalid("must not contain relative path components"));
    }
    if value.chars().any(char::is_control) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(())
}

macro_rules! segment_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, ImageError> {
                let value = value.into();
                validate_segment($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ImageError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

segment_id!(
    /// Opaque user identifier supplied by the authentication layer.
    UserId,
    "user id"
);

segment_id!(
    /// Opaque listing identifier.
    ListingId,
    "listing id"
);

/// An uploaded image that is not yet attached to a published listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftImage {
    bucket: String,
    user_id: UserId,
    file_name: String,
}

impl DraftImage {
    pub fn new(
        bucket: impl Into<String>,
        user_id: UserId,
        file_name: impl Into<String>,
    ) -> Result<Self, ImageError> {
        let file_name = file_name.into();
        validate_segment("file name", &file_name)?;
        Ok(Self {
            bucket: bucket.into(),
            user_id,
            file_name,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Relative key without the bucket
    pub fn key(&self) -> String {
        format!("{}/{}", self.user_id, self.file_name)
    }

    /// Full path including the bucket
    pub fn path(&self) -> String {
        format!("{}/{}", self.bucket, self.key())
    }

    /// The persistent location this draft is promoted to. Identity fields carry over unchanged.
    pub fn to_persistent(
        &self,
        persistent_bucket: impl Into<String>,
        listing_id: ListingId,
    ) -> PersistentImage {
        PersistentImage {
            bucket: persistent_bucket.into(),
            user_id: self.user_id.clone(),
            listing_id,
            file_name: self.file_name.clone(),
        }
    }
}

/// An image attached to a listing, stored in the durable namespace.
///
/// Only constructed through [`DraftImage::to_persistent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentImage {
    bucket: String,
    user_id: UserId,
    listing_id: ListingId,
    file_name: String,
}

impl PersistentImage {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn listing_id(&self) -> &ListingId {
        &self.listing_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Relative key without the bucket. Includes the listing so two listings of the
    /// same user never share a key.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.user_id, self.listing_id, self.file_name)
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.bucket, self.key())
    }
}

/// Either lifecycle phase of a stored listing image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum StoredImage {
    Draft(DraftImage),
    Persistent(PersistentImage),
}

impl StoredImage {
    pub fn bucket(&self) -> &str {
        match self {
            StoredImage::Draft(image) => image.bucket(),
            StoredImage::Persistent(image) => image.bucket(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        match self {
            StoredImage::Draft(image) => image.user_id(),
            StoredImage::Persistent(image) => image.user_id(),
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            StoredImage::Draft(image) => image.file_name(),
            StoredImage::Persistent(image) => image.file_name(),
        }
    }

    pub fn key(&self) -> String {
        match self {
            StoredImage::Draft(image) => image.key(),
            StoredImage::Persistent(image) => image.key(),
        }
    }

    pub fn path(&self) -> String {
        match self {
            StoredImage::Draft(image) => image.path(),
            StoredImage::Persistent(image) => image.path(),
        }
    }
}

impl From<DraftImage> for StoredImage {
    fn from(image: DraftImage) -> Self {
        StoredImage::Draft(image)
    }
}

impl From<PersistentImage> for StoredImage {
    fn from(image: PersistentImage) -> Self {
        StoredImage::Persistent(image)
    }
}
