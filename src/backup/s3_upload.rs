// dbbackup/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use s3::config::retry::RetryConfig;
use s3::config::{Region, RequestChecksumCalculation, ResponseChecksumValidation};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::MetadataDirective;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info};

use crate::config::StorageConfig;
use crate::errors::UploadError;

/// Everything except RFC 3986 unreserved characters and the `/` separator.
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Stores a local file in a bucket and tags the stored object.
///
/// Upload is not atomic: if the metadata step fails the object may already
/// exist without its metadata.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), UploadError>;
}

/// Uploader for S3-compatible object stores (Google Cloud Storage through its
/// XML interoperability endpoint, AWS S3, DigitalOcean Spaces, MinIO).
pub struct S3Uploader {
    client: s3::Client,
}

impl S3Uploader {
    /// Builds the SDK client once; it is reused for every job of the run.
    pub async fn from_config(storage_config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&storage_config.endpoint_url)
            .region(Region::new(storage_config.region.clone()));

        if let Some(credentials) = &storage_config.credentials {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }

        let sdk_config = loader.load().await;

        // GCS interoperability rejects aws-chunked uploads with trailing checksums.
        // A failed request is final; the SDK must not retry it.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .retry_config(RetryConfig::disabled())
            .build();

        S3Uploader {
            client: s3::Client::from_conf(s3_config),
        }
    }

    async fn transfer(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), UploadError> {
        let transfer_failed = |reason: String| UploadError::TransferFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };

        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            transfer_failed(format!("failed to read {}: {}", local_path.display(), e))
        })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_failed(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    // Object metadata can only be replaced by copying the object onto itself.
    async fn update_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), UploadError> {
        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .content_type("application/octet-stream")
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| UploadError::MetadataUpdateFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

/// Value of `x-amz-copy-source`: `bucket/key` with the key URL-encoded.
pub fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE_ENCODE_SET))
}

#[async_trait]
impl ObjectUploader for S3Uploader {
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), UploadError> {
        info!("Uploading {} to {}/{}", local_path.display(), bucket, key);

        let result = match self.transfer(local_path, bucket, key).await {
            Ok(()) => self.update_metadata(bucket, key, metadata).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => info!(bucket, key, "Upload completed successfully"),
            Err(e) => error!(bucket, key, error = %e, "Upload failed"),
        }
        result
    }
}
