use crate::policy::{PostPolicySigner, SigningCredentials};
use crate::traits::{
    ObjectMetadata, PostPolicy, PresignedPost, Storage, StorageError, StorageResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::Utc;
use gallery_core::StorageConfig;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
    Result as ObjectResult,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Characters left as-is in an `x-amz-copy-source` header
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `{bucket}/{key}` with the key URL-encoded, as CopyObject expects
pub(crate) fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

/// S3 storage implementation
///
/// `object_store` binds one client to one bucket, so a client is built lazily for
/// every bucket touched and cached for the lifetime of the storage. Copies go
/// through the AWS SDK, whose `CopyObject` works server-side across buckets.
pub struct S3Storage {
    config: StorageConfig,
    stores: RwLock<HashMap<String, Arc<AmazonS3>>>,
    client: Client,
    signer: Option<PostPolicySigner>,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// Credentials not present in `config` are resolved from the environment
    /// (instance profile, web identity). Presigned POST needs explicit keys.
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(PostPolicySigner::new(
                config.region.clone(),
                SigningCredentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: config.session_token.clone(),
                },
            )),
            _ => None,
        };

        let client = Self::build_client(&config).await;

        Ok(S3Storage {
            config,
            stores: RwLock::new(HashMap::new()),
            client,
            signer,
        })
    }

    async fn build_client(config: &StorageConfig) -> Client {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(config.region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(config.connect_timeout)
            .operation_attempt_timeout(config.request_timeout)
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .timeout_config(timeout_config);

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                config.session_token.clone(),
                None,
                "gallery-config",
            ));
        }

        let sdk_config = loader.load().await;

        match config.endpoint {
            // S3-compatible providers (MinIO etc.) need path-style addressing
            Some(ref endpoint) => {
                let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .endpoint_url(endpoint)
                    .retry_config(retry_config)
                    .force_path_style(true)
                    .build();
                Client::from_conf(s3_config)
            }
            None => Client::new(&sdk_config),
        }
    }

    fn build_store(&self, bucket: &str) -> StorageResult<AmazonS3> {
        let client_options = ClientOptions::new()
            .with_connect_timeout(self.config.connect_timeout)
            .with_timeout(self.config.request_timeout);

        let mut builder = AmazonS3Builder::from_env()
            .with_region(self.config.region.clone())
            .with_bucket_name(bucket)
            .with_client_options(client_options);

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&self.config.access_key_id, &self.config.secret_access_key)
        {
            builder = builder
                .with_access_key_id(access_key_id)
                .with_secret_access_key(secret_access_key);
            if let Some(token) = &self.config.session_token {
                builder = builder.with_token(token);
            }
        }

        if let Some(ref endpoint) = self.config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))
    }

    fn store(&self, bucket: &str) -> StorageResult<Arc<AmazonS3>> {
        if let Some(store) = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
        {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(self.build_store(bucket)?);
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            stores.entry(bucket.to_string()).or_insert(store),
        ))
    }

    /// POST target for a bucket
    ///
    /// For AWS S3, uses the virtual-hosted form: https://{bucket}.s3.{region}.amazonaws.com
    /// For S3-compatible providers, uses path-style: {endpoint}/{bucket}
    fn post_url(&self, bucket: &str) -> String {
        if let Some(ref endpoint) = self.config.endpoint {
            format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
        } else {
            format!("https://{}.s3.{}.amazonaws.com", bucket, self.config.region)
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        attributes: Attributes,
    ) -> StorageResult<()> {
        let store = self.store(bucket)?;
        let size = data.len() as u64;
        let location = Path::from(key);
        let start = std::time::Instant::now();

        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        let result: ObjectResult<_> = store
            .put_opts(&location, PutPayload::from(data), options)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(())
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn presigned_post(
        &self,
        bucket: &str,
        key: &str,
        policy: &PostPolicy,
    ) -> StorageResult<PresignedPost> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            StorageError::ConfigError(
                "Presigned POST requires AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY".to_string(),
            )
        })?;
        signer.sign(self.post_url(bucket), bucket, key, policy, Utc::now())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let store = self.store(bucket)?;
        let start = std::time::Instant::now();
        let location = Path::from(key);

        let result: ObjectResult<_> = store.get(&location).await;

        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(format!("{}/{}", bucket, key)),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = bytes.len() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(bytes)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        for (name, value) in metadata {
            attributes.insert(Attribute::Metadata(name.clone().into()), value.clone().into());
        }
        self.put_object(bucket, key, data, attributes).await
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let source = copy_source(src_bucket, src_key);

        let result = self
            .client
            .copy_object()
            .bucket(dst_bucket)
            .copy_source(&source)
            .key(dst_key)
            .send()
            .await;

        if let Err(e) = result {
            if matches!(e.code(), Some("NoSuchKey") | Some("NotFound")) {
                return Err(StorageError::NotFound(format!("{}/{}", src_bucket, src_key)));
            }
            tracing::error!(
                error = %e,
                copy_source = %source,
                dst_bucket = %dst_bucket,
                dst_key = %dst_key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 copy failed"
            );
            return Err(StorageError::CopyFailed(e.to_string()));
        }

        tracing::info!(
            src_bucket = %src_bucket,
            src_key = %src_key,
            dst_bucket = %dst_bucket,
            dst_key = %dst_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 copy successful"
        );

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let store = self.store(bucket)?;
        let start = std::time::Instant::now();
        let location = Path::from(key);

        let result: ObjectResult<_> = store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let store = self.store(bucket)?;
        let location = Path::from(key);
        match store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
