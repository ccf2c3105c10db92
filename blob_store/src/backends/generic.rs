//! Backend over any `object_store` implementation.
//!
//! `object_store` has no metadata-only copy, so a metadata replacement reads
//! the payload and writes it back with the new attributes. The write is still
//! a single atomic put, and with `PutMode::Update` it only lands if the
//! object's ETag is unchanged.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    memory::InMemory,
    path::Path,
    Attribute,
    AttributeValue,
    Attributes,
    ObjectStore,
    PutMode,
    PutOptions,
    PutPayload,
    UpdateVersion,
};
use opentelemetry::KeyValue;
use percent_encoding::utf8_percent_encode;
use tracing::debug;

use super::KEY_ENCODE_SET;
use crate::{
    BlobBackend,
    BlobError,
    BlobResult,
    Metadata,
    MetadataUpdate,
    ObjectSummary,
    StoredObject,
};

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    url_scheme: String,
    metrics: metrics::blob_storage::Metrics,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, url_scheme: &str) -> Self {
        Self {
            store,
            url_scheme: url_scheme.to_string(),
            metrics: metrics::blob_storage::Metrics::new(),
        }
    }

    /// A process-local backend. Objects vanish when the process exits.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    fn record_error(&self, op: &'static str) {
        self.metrics.errors.add(1, &[KeyValue::new("op", op)]);
    }

    fn timer(&self, op: &'static str) -> metrics::Timer {
        metrics::Timer::start_with_labels(&self.metrics.operations, &[KeyValue::new("op", op)])
    }

    fn map_err(&self, op: &'static str, key: &str, err: object_store::Error) -> BlobError {
        self.record_error(op);
        match BlobError::from(err) {
            BlobError::NotFound { .. } => BlobError::NotFound {
                key: key.to_string(),
            },
            BlobError::PreconditionFailed { .. } => BlobError::PreconditionFailed {
                key: key.to_string(),
            },
            other => other,
        }
    }
}

fn to_attributes(content_type: Option<&str>, metadata: Metadata) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(content_type) = content_type {
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
    }
    for (name, value) in metadata {
        attributes.insert(Attribute::Metadata(name.into()), AttributeValue::from(value));
    }
    attributes
}

fn from_attributes(attributes: &Attributes) -> (Option<String>, Metadata) {
    let mut content_type = None;
    let mut metadata = Metadata::new();
    for (attribute, value) in attributes.iter() {
        match attribute {
            Attribute::ContentType => content_type = Some(value.to_string()),
            Attribute::Metadata(name) => {
                metadata.insert(name.to_string(), value.to_string());
            }
            _ => {}
        }
    }
    (content_type, metadata)
}

#[async_trait]
impl BlobBackend for ObjectStoreBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> BlobResult<()> {
        let _timer = self.timer("put");
        let options = PutOptions {
            attributes: to_attributes(Some(content_type), metadata),
            ..Default::default()
        };
        self.store
            .put_opts(&Path::from(key), PutPayload::from(data), options)
            .await
            .map_err(|e| self.map_err("put", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<StoredObject> {
        let _timer = self.timer("get");
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| self.map_err("get", key, e))?;
        let (content_type, metadata) = from_attributes(&result.attributes);
        Ok(StoredObject {
            key: key.to_string(),
            metadata,
            content_type,
            last_modified: Some(result.meta.last_modified),
            e_tag: result.meta.e_tag.clone(),
            size_bytes: result.meta.size as u64,
        })
    }

    async fn list(&self, prefix: &str) -> BlobResult<Vec<ObjectSummary>> {
        let _timer = self.timer("list");
        // object_store lists by path segment, so the string prefix is applied
        // to the listed keys here.
        let objects: Vec<_> = self
            .store
            .list(None)
            .try_collect()
            .await
            .map_err(|e| self.map_err("list", prefix, e))?;
        let summaries: Vec<ObjectSummary> = objects
            .into_iter()
            .filter(|meta| meta.location.as_ref().starts_with(prefix))
            .map(|meta| ObjectSummary {
                key: meta.location.to_string(),
                last_modified: Some(meta.last_modified),
            })
            .collect();
        debug!(prefix, count = summaries.len(), "listed objects");
        Ok(summaries)
    }

    async fn copy_replace_metadata(&self, key: &str, update: MetadataUpdate) -> BlobResult<()> {
        let _timer = self.timer("copy_replace_metadata");
        let path = Path::from(key);
        let current = self
            .store
            .get(&path)
            .await
            .map_err(|e| self.map_err("copy_replace_metadata", key, e))?;
        let (current_content_type, _) = from_attributes(&current.attributes);
        let content_type = update.content_type.or(current_content_type);
        let data = current
            .bytes()
            .await
            .map_err(|e| self.map_err("copy_replace_metadata", key, e))?;

        let mode = match update.if_match {
            Some(e_tag) => PutMode::Update(UpdateVersion {
                e_tag: Some(e_tag),
                version: None,
            }),
            None => PutMode::Overwrite,
        };
        let options = PutOptions {
            mode,
            attributes: to_attributes(content_type.as_deref(), update.metadata),
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(|e| self.map_err("copy_replace_metadata", key, e))?;
        Ok(())
    }

    // Every put mints a new ETag, metadata replacements included.
    fn supports_conditional_metadata(&self) -> bool {
        true
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> BlobResult<String> {
        crate::presign::validate_expiry(expires_in)
            .map_err(|reason| BlobError::PresignError { reason })?;
        // Local stores have no signing; the URL only names the object.
        Ok(format!(
            "{}:///{}?expires_in={}",
            self.url_scheme,
            utf8_percent_encode(key, KEY_ENCODE_SET),
            expires_in.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_and_get_metadata() {
        let backend = ObjectStoreBackend::in_memory();
        backend
            .put(
                "CA-1.png",
                Bytes::from_static(b"png"),
                "image/png",
                metadata(&[("upvotes", "0"), ("flagged", "false")]),
            )
            .await
            .unwrap();

        let object = backend.get("CA-1.png").await.unwrap();
        assert_eq!(object.key, "CA-1.png");
        assert_eq!(object.content_type.as_deref(), Some("image/png"));
        assert_eq!(object.metadata.get("upvotes").map(String::as_str), Some("0"));
        assert_eq!(object.size_bytes, 3);
        assert!(object.e_tag.is_some());
        assert!(object.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_object() {
        let backend = ObjectStoreBackend::in_memory();
        let err = backend.get("CA-404.png").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound { key } if key == "CA-404.png"));
    }

    #[tokio::test]
    async fn test_list_uses_string_prefix() {
        let backend = ObjectStoreBackend::in_memory();
        for key in ["CA-1.png", "CA-2.jpg", "CO-1.png", "New York-3.gif"] {
            backend
                .put(key, Bytes::from_static(b"x"), "image/png", Metadata::new())
                .await
                .unwrap();
        }

        let mut keys: Vec<String> = backend
            .list("CA-")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["CA-1.png", "CA-2.jpg"]);

        let keys = backend.list("New York-").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, "New York-3.gif");

        assert!(backend.list("ZZ-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_replace_keeps_payload_and_content_type() {
        let backend = ObjectStoreBackend::in_memory();
        backend
            .put(
                "CA-1.png",
                Bytes::from_static(b"image-bytes"),
                "image/png",
                metadata(&[("upvotes", "0"), ("downvotes", "0")]),
            )
            .await
            .unwrap();

        backend
            .copy_replace_metadata(
                "CA-1.png",
                MetadataUpdate::new(metadata(&[("upvotes", "1")])),
            )
            .await
            .unwrap();

        let object = backend.get("CA-1.png").await.unwrap();
        assert_eq!(object.metadata, metadata(&[("upvotes", "1")]));
        assert_eq!(object.content_type.as_deref(), Some("image/png"));
        assert_eq!(object.size_bytes, 11);
    }

    #[tokio::test]
    async fn test_copy_replace_with_stale_etag_is_rejected() {
        let backend = ObjectStoreBackend::in_memory();
        backend
            .put("CA-1.png", Bytes::from_static(b"x"), "image/png", Metadata::new())
            .await
            .unwrap();
        let stale = backend.get("CA-1.png").await.unwrap().e_tag;

        backend
            .copy_replace_metadata(
                "CA-1.png",
                MetadataUpdate::new(metadata(&[("flagged", "true")])).with_if_match(stale.clone()),
            )
            .await
            .unwrap();

        assert!(backend.supports_conditional_metadata());
        let err = backend
            .copy_replace_metadata(
                "CA-1.png",
                MetadataUpdate::new(metadata(&[("flagged", "false")])).with_if_match(stale),
            )
            .await
            .unwrap_err();
        assert!(err.is_precondition_failed());

        let object = backend.get("CA-1.png").await.unwrap();
        assert_eq!(object.metadata, metadata(&[("flagged", "true")]));
    }

    #[tokio::test]
    async fn test_copy_replace_missing_object() {
        let backend = ObjectStoreBackend::in_memory();
        let err = backend
            .copy_replace_metadata("CA-404.png", MetadataUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_presign_get_encodes_key() {
        let backend = ObjectStoreBackend::in_memory();
        let url = backend
            .presign_get("New York-1.png", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "memory:///New%20York-1.png?expires_in=60");

        assert!(backend
            .presign_get("CA-1.png", Duration::ZERO)
            .await
            .is_err());
    }
}
