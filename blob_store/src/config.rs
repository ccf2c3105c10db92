//! Blob storage configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{presign, BlobError, BlobResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Any S3 compatible service (AWS, Tigris, MinIO, R2).
    S3,
    /// Process-local object store. Data is lost on restart.
    #[default]
    Memory,
}

/// Configuration for the blob backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobStorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Service endpoint, e.g. `https://fly.storage.tigris.dev`. The AWS
    /// default endpoint is used when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Signing region. S3 compatible services commonly accept `auto`.
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket holding the image objects. Required for S3.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Static credentials. When unset the AWS default credential chain is used.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Lifetime of presigned read URLs.
    #[serde(default = "default_signed_url_expiry_secs")]
    pub signed_url_expiry_secs: u64,

    /// Upper bound for every single backend call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Use path style addressing (`endpoint/bucket/key`), needed by MinIO.
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_signed_url_expiry_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            endpoint: None,
            region: default_region(),
            bucket: None,
            access_key_id: None,
            secret_access_key: None,
            signed_url_expiry_secs: default_signed_url_expiry_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            force_path_style: false,
        }
    }
}

impl BlobStorageConfig {
    pub fn signed_url_expiry(&self) -> Duration {
        Duration::from_secs(self.signed_url_expiry_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> BlobResult<()> {
        presign::validate_expiry(self.signed_url_expiry())
            .map_err(|reason| BlobError::InvalidConfig { reason })?;
        if self.request_timeout_secs == 0 {
            return Err(BlobError::InvalidConfig {
                reason: "request_timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.backend == BackendKind::S3 {
            match self.bucket.as_deref() {
                Some(bucket) if !bucket.trim().is_empty() => {}
                _ => {
                    return Err(BlobError::InvalidConfig {
                        reason: "bucket is required for the s3 backend".to_string(),
                    })
                }
            }
            if self.access_key_id.is_some() != self.secret_access_key.is_some() {
                return Err(BlobError::InvalidConfig {
                    reason: "access_key_id and secret_access_key must be set together"
                        .to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BlobStorageConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.signed_url_expiry(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = BlobStorageConfig {
            backend: BackendKind::S3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BlobError::InvalidConfig { .. })
        ));

        let config = BlobStorageConfig {
            backend: BackendKind::S3,
            bucket: Some("images".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_must_be_paired() {
        let config = BlobStorageConfig {
            backend: BackendKind::S3,
            bucket: Some("images".to_string()),
            access_key_id: Some("tid_key".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expiry_bounds() {
        let config = BlobStorageConfig {
            signed_url_expiry_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BlobStorageConfig {
            signed_url_expiry_secs: 8 * 24 * 60 * 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
