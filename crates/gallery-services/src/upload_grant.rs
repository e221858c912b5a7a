use gallery_core::{
    DraftImage, GrantConstraints, ImageError, ImageResult, UploadConfig, UploadGrant, UserId,
};
use gallery_storage::{PostPolicy, Storage};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Canonical file extension for an upload content type.
///
/// Matching ignores case and any `; parameter` suffix.
pub fn canonical_extension(content_type: &str) -> Option<&'static str> {
    match normalize_content_type(content_type).as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/heif" => Some("heif"),
        _ => None,
    }
}

fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Issues short-lived presigned POST grants for draft uploads
pub struct UploadGrantIssuer {
    storage: Arc<dyn Storage>,
    config: UploadConfig,
}

impl UploadGrantIssuer {
    pub fn new(storage: Arc<dyn Storage>, config: UploadConfig) -> Self {
        Self { storage, config }
    }

    /// Grant `user_id` a single upload of `content_type` into the draft bucket.
    ///
    /// The object key is generated here and is the only key the grant can write.
    /// Nothing is written to storage.
    #[tracing::instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn issue_grant(&self, user_id: &UserId, content_type: &str) -> ImageResult<UploadGrant> {
        let normalized = normalize_content_type(content_type);
        if !self.config.allowed_content_types.contains(&normalized) {
            return Err(ImageError::UnsupportedMediaType(content_type.to_string()));
        }
        let extension = canonical_extension(&normalized)
            .ok_or_else(|| ImageError::UnsupportedMediaType(content_type.to_string()))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension);
        let draft = DraftImage::new(&self.config.draft_bucket, user_id.clone(), file_name)?;
        let key = draft.key();

        let policy = PostPolicy {
            expires_in: Duration::from_secs(self.config.grant_expiry_secs),
            min_content_length: 1,
            max_content_length: self.config.max_file_size_bytes,
        };

        let post = self
            .storage
            .presigned_post(draft.bucket(), &key, &policy)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %draft.bucket(),
                    key = %key,
                    "Failed to sign upload grant"
                );
                ImageError::StorageUnavailable(e.to_string())
            })?;

        tracing::info!(
            user_id = %user_id,
            bucket = %draft.bucket(),
            key = %key,
            content_type = %normalized,
            expires_at = %post.expires_at,
            "Upload grant issued"
        );

        Ok(UploadGrant {
            key: key.clone(),
            expires_in_seconds: self.config.grant_expiry_secs,
            expires_at: post.expires_at,
            endpoint_url: post.url,
            required_fields: post.fields,
            constraints: GrantConstraints {
                min_bytes: policy.min_content_length,
                max_bytes: policy.max_content_length,
                exact_key: key,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gallery_storage::{MemoryStorage, Operation, StorageError};

    fn config() -> UploadConfig {
        UploadConfig {
            max_file_size_bytes: 1024,
            ..UploadConfig::default()
        }
    }

    fn issuer(storage: Arc<MemoryStorage>) -> UploadGrantIssuer {
        UploadGrantIssuer::new(storage, config())
    }

    #[test]
    fn test_canonical_extension() {
        assert_eq!(canonical_extension("image/jpeg"), Some("jpg"));
        assert_eq!(canonical_extension("IMAGE/JPG"), Some("jpg"));
        assert_eq!(canonical_extension("image/png; charset=binary"), Some("png"));
        assert_eq!(canonical_extension("image/heif"), Some("heif"));
        assert_eq!(canonical_extension("image/gif"), None);
        assert_eq!(canonical_extension("text/plain"), None);
    }

    #[tokio::test]
    async fn test_grant_targets_generated_draft_key() {
        let storage = Arc::new(MemoryStorage::new());
        let user = UserId::new("user-42").unwrap();

        let grant = issuer(storage.clone())
            .issue_grant(&user, "image/JPEG")
            .await
            .unwrap();

        let (user_part, file_name) = grant.key.split_once('/').unwrap();
        assert_eq!(user_part, "user-42");
        let (stem, ext) = file_name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        assert!(Uuid::parse_str(stem).is_ok());

        let draft = DraftImage::new("listings-gallery-draft", user, file_name).unwrap();
        assert_eq!(grant.key, draft.key());
        assert_eq!(grant.constraints.exact_key, draft.key());
        assert_eq!(grant.field("key"), Some(draft.key().as_str()));
        assert_eq!(grant.field("bucket"), Some("listings-gallery-draft"));
        assert_eq!(grant.constraints.min_bytes, 1);
        assert_eq!(grant.constraints.max_bytes, 1024);
        assert_eq!(grant.expires_in_seconds, 300);
        assert!(storage.keys("listings-gallery-draft").is_empty());
    }

    #[tokio::test]
    async fn test_grant_is_enforced_on_upload() {
        let storage = Arc::new(MemoryStorage::new());
        let user = UserId::new("user-42").unwrap();
        let grant = issuer(storage.clone())
            .issue_grant(&user, "image/png")
            .await
            .unwrap();
        let bucket = "listings-gallery-draft";

        let mut wrong_key = grant.required_fields.clone();
        for (name, value) in wrong_key.iter_mut() {
            if name == "key" {
                *value = "user-7/stolen.png".to_string();
            }
        }
        assert!(matches!(
            storage.simulate_post(bucket, &wrong_key, Bytes::from_static(b"png")),
            Err(StorageError::AccessDenied(_))
        ));
        assert!(storage
            .simulate_post(bucket, &grant.required_fields, Bytes::from(vec![1u8; 1025]))
            .is_err());
        assert!(storage
            .simulate_post(bucket, &grant.required_fields, Bytes::new())
            .is_err());
        assert!(storage
            .simulate_post_at(
                bucket,
                &grant.required_fields,
                Bytes::from_static(b"png"),
                grant.expires_at + chrono::Duration::seconds(1),
            )
            .is_err());
        assert!(storage.keys(bucket).is_empty());

        storage
            .simulate_post(bucket, &grant.required_fields, Bytes::from_static(b"png"))
            .unwrap();
        assert_eq!(storage.keys(bucket), vec![grant.key.clone()]);
    }

    #[tokio::test]
    async fn test_rejects_disallowed_content_type() {
        let storage = Arc::new(MemoryStorage::new());
        let user = UserId::new("user-42").unwrap();
        let issuer = UploadGrantIssuer::new(
            storage.clone(),
            UploadConfig {
                allowed_content_types: vec!["image/jpeg".to_string()],
                ..UploadConfig::default()
            },
        );

        for content_type in ["image/png", "image/gif", "application/pdf"] {
            let err = issuer.issue_grant(&user, content_type).await.unwrap_err();
            assert!(matches!(err, ImageError::UnsupportedMediaType(_)));
        }
        assert_eq!(storage.call_count(Operation::PresignedPost), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_unavailable() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_on(Operation::PresignedPost, "");
        let user = UserId::new("user-42").unwrap();

        let err = issuer(storage)
            .issue_grant(&user, "image/webp")
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::StorageUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_grant_serializes_camel_case() {
        let storage = Arc::new(MemoryStorage::new());
        let user = UserId::new("user-42").unwrap();
        let grant = issuer(storage).issue_grant(&user, "image/jpeg").await.unwrap();

        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["key"], grant.key.as_str());
        assert_eq!(json["endpointUrl"], "memory://listings-gallery-draft");
        assert_eq!(json["requiredFields"]["key"], grant.key.as_str());
        assert_eq!(json["constraints"]["exactKey"], grant.key.as_str());
    }
}
