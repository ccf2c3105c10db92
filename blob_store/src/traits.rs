//! Core blob backend trait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BlobResult, Metadata, MetadataUpdate, ObjectSummary, StoredObject};

/// The four primitives the vote store is layered on, plus URL presigning.
///
/// Every call is atomic on a single object. Nothing spans two calls: a `get`
/// followed by `copy_replace_metadata` can interleave with other writers
/// unless the update carries an `if_match` precondition.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store `data` under `key` together with its content type and metadata.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> BlobResult<()>;

    /// Read the metadata of one object without downloading its payload.
    ///
    /// Returns `BlobError::NotFound` if the object doesn't exist.
    async fn get(&self, key: &str) -> BlobResult<StoredObject>;

    /// List every object whose key starts with `prefix`. This is a plain
    /// string prefix, not a directory.
    async fn list(&self, prefix: &str) -> BlobResult<Vec<ObjectSummary>>;

    /// Replace the whole metadata map of an existing object.
    ///
    /// Returns `BlobError::NotFound` if the object doesn't exist and
    /// `BlobError::PreconditionFailed` if `update.if_match` no longer matches.
    async fn copy_replace_metadata(&self, key: &str, update: MetadataUpdate) -> BlobResult<()>;

    /// Whether an `if_match` on `copy_replace_metadata` is rejected once
    /// another metadata replacement has landed. This needs an ETag that moves
    /// on every metadata write.
    fn supports_conditional_metadata(&self) -> bool {
        false
    }

    /// Generate a URL that allows reading the object for `expires_in`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> BlobResult<String>;
}
