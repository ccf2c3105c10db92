//! S3 backend using aws-sdk-s3 for data, metadata and presigning.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{timeout::TimeoutConfig, BehaviorVersion};
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as S3DateTime},
    types::MetadataDirective,
    Client as S3Client,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use percent_encoding::utf8_percent_encode;
use tracing::debug;

use super::KEY_ENCODE_SET;
use crate::{
    presign,
    BlobBackend,
    BlobError,
    BlobResult,
    BlobStorageConfig,
    Metadata,
    MetadataUpdate,
    ObjectSummary,
    StoredObject,
};

/// S3 blob backend.
pub struct S3Backend {
    client: S3Client,
    bucket: String,
    metrics: metrics::blob_storage::Metrics,
}

impl S3Backend {
    /// Build a client from the configured endpoint, region and credentials.
    pub async fn new(config: &BlobStorageConfig) -> BlobResult<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| BlobError::InvalidConfig {
                reason: "bucket is required for the s3 backend".to_string(),
            })?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.request_timeout())
                    .build(),
            );
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "gallery-config",
            ));
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        debug!(
            bucket = %bucket,
            endpoint = ?config.endpoint,
            "Created S3 blob backend"
        );

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket,
            metrics: metrics::blob_storage::Metrics::new(),
        })
    }

    fn timer(&self, op: &'static str) -> metrics::Timer {
        metrics::Timer::start_with_labels(&self.metrics.operations, &[KeyValue::new("op", op)])
    }

    /// Translate an SDK error, keeping not-found and failed preconditions
    /// distinguishable for the store.
    fn map_err<E>(&self, op: &'static str, key: &str, err: SdkError<E>) -> BlobError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        self.metrics.errors.add(1, &[KeyValue::new("op", op)]);
        let status = err.raw_response().map(|r| r.status().as_u16());
        let code = err
            .as_service_error()
            .and_then(|e| e.code())
            .map(str::to_string);
        match (status, code.as_deref()) {
            (_, Some("NoSuchKey")) | (_, Some("NotFound")) | (Some(404), _) => {
                BlobError::NotFound {
                    key: key.to_string(),
                }
            }
            (_, Some("PreconditionFailed")) | (Some(412), _) => BlobError::PreconditionFailed {
                key: key.to_string(),
            },
            _ => BlobError::NetworkError {
                source: anyhow::Error::new(err).context(format!("S3 {} failed for {}", op, key)),
            },
        }
    }

    /// `CopySource` is `bucket/key` with the key URL encoded.
    fn copy_source(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(key, KEY_ENCODE_SET)
        )
    }
}

fn to_chrono(value: Option<&S3DateTime>) -> Option<DateTime<Utc>> {
    value.and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
}

#[async_trait]
impl BlobBackend for S3Backend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> BlobResult<()> {
        let _timer = self.timer("put");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| self.map_err("put", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<StoredObject> {
        let _timer = self.timer("get");
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.map_err("get", key, e))?;

        Ok(StoredObject {
            key: key.to_string(),
            metadata: output.metadata().cloned().unwrap_or_default(),
            content_type: output.content_type().map(str::to_string),
            last_modified: to_chrono(output.last_modified()),
            e_tag: output.e_tag().map(str::to_string),
            size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
        })
    }

    async fn list(&self, prefix: &str) -> BlobResult<Vec<ObjectSummary>> {
        let _timer = self.timer("list");
        let mut summaries = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| self.map_err("list", prefix, e))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    summaries.push(ObjectSummary {
                        key: key.to_string(),
                        last_modified: to_chrono(object.last_modified()),
                    });
                }
            }

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }
        debug!(prefix, count = summaries.len(), "listed objects");
        Ok(summaries)
    }

    async fn copy_replace_metadata(&self, key: &str, update: MetadataUpdate) -> BlobResult<()> {
        let _timer = self.timer("copy_replace_metadata");
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(self.copy_source(key))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(update.metadata))
            .set_content_type(update.content_type)
            .set_copy_source_if_match(update.if_match)
            .send()
            .await
            .map_err(|e| self.map_err("copy_replace_metadata", key, e))?;
        Ok(())
    }

    // S3 ETags hash the payload only. A metadata-only CopyObject keeps the
    // ETag, so two writers holding the same one both pass `if_match`.
    fn supports_conditional_metadata(&self) -> bool {
        false
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> BlobResult<String> {
        presign::validate_expiry(expires_in).map_err(|reason| BlobError::PresignError { reason })?;

        let presigning_config =
            PresigningConfig::expires_in(expires_in).map_err(|e| BlobError::PresignError {
                reason: format!("Failed to create presigning config: {}", e),
            })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| BlobError::PresignError {
                reason: format!("Failed to generate presigned GET URL: {}", e),
            })?;

        Ok(presigned.uri().to_string())
    }
}
