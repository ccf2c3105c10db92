//! Image records kept entirely in blob storage.
//!
//! Each image is one object. Its vote tallies, per-user votes and flag live in
//! the object's metadata and are replaced as a whole on every mutation; the
//! only index is the `{region}-` key prefix.

mod config;
mod error;
#[cfg(test)]
mod testing;

use std::{future::Future, sync::Arc, time::Duration};

use blob_store::{BlobBackend, BlobError, BlobResult, MetadataUpdate, StoredObject};
use bytes::Bytes;
use chrono::DateTime;
pub use config::{StoreConfig, WriteMode};
use data_model::{
    codec::{self, DecodeOutcome},
    validate_user_id,
    ImageKey,
    ImageView,
    Region,
    Vote,
    VoteChange,
    VoteOutcome,
    VoteRecord,
};
pub use error::{Result, VoteStoreError};
use futures::{StreamExt, TryStreamExt};
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

const MAX_KEY_LEN: usize = 1024;

pub struct VoteStore {
    backend: Arc<dyn BlobBackend>,
    config: StoreConfig,
    signed_url_expiry: Duration,
    backend_timeout: Duration,
    metrics: metrics::vote_store::Metrics,
}

impl VoteStore {
    /// A conditional `write_mode` is downgraded to last-writer-wins when the
    /// backend can't reject stale metadata writes.
    pub fn new(backend: Arc<dyn BlobBackend>, mut config: StoreConfig) -> Self {
        if config.write_mode == WriteMode::Conditional && !backend.supports_conditional_metadata() {
            warn!(
                "blob backend cannot reject stale metadata writes, \
                 falling back to last_writer_wins; concurrent votes may be lost"
            );
            config.write_mode = WriteMode::LastWriterWins;
        }
        Self {
            backend,
            config,
            signed_url_expiry: Duration::from_secs(3600),
            backend_timeout: Duration::from_secs(10),
            metrics: metrics::vote_store::Metrics::new(),
        }
    }

    pub fn with_signed_url_expiry(mut self, expiry: Duration) -> Self {
        self.signed_url_expiry = expiry;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// The mode mutations actually run with.
    pub fn write_mode(&self) -> WriteMode {
        self.config.write_mode
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = BlobResult<T>>,
    ) -> BlobResult<T> {
        match tokio::time::timeout(self.backend_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BlobError::Timeout { op }),
        }
    }

    fn decode(&self, object: &StoredObject) -> VoteRecord {
        let DecodeOutcome { record, corrupt } = codec::decode(&object.metadata);
        for issue in &corrupt {
            warn!(
                key = %object.key,
                field = issue.field,
                reason = %issue.reason,
                "corrupt vote metadata, using defaults"
            );
        }
        if !corrupt.is_empty() {
            self.metrics.corrupt_metadata.add(corrupt.len() as u64, &[]);
        }
        record
    }

    /// Store a new image with zeroed tallies and return its key.
    ///
    /// The key embeds the current time in milliseconds; two uploads to the
    /// same region within one millisecond and with the same extension
    /// overwrite each other.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn create_record(
        &self,
        region: &str,
        data: Bytes,
        content_type: &str,
        extension: &str,
    ) -> Result<String> {
        let region = Region::new(region).map_err(VoteStoreError::invalid_input)?;
        let key = ImageKey::new(region, gallery_utils::get_epoch_time_in_ms(), extension)
            .map_err(VoteStoreError::invalid_input)?
            .to_string();
        let size = data.len() as u64;

        let metadata = codec::encode(&VoteRecord::default());
        self.call("put", self.backend.put(&key, data, content_type, metadata))
            .await?;

        self.metrics.uploads.add(1, &[]);
        self.metrics.upload_bytes.add(size, &[]);
        info!(key = %key, "created image record");
        Ok(key)
    }

    /// Every image of `region`, in backend listing order.
    ///
    /// An image deleted between the listing and its metadata fetch is left
    /// out. Any other failure fails the whole listing.
    #[tracing::instrument(skip(self))]
    pub async fn list_records(&self, region: &str, user_id: Option<&str>) -> Result<Vec<ImageView>> {
        let region = Region::new(region).map_err(VoteStoreError::invalid_input)?;
        let user_id = lookup_user(user_id);

        let prefix = region.key_prefix();
        let summaries = self.call("list", self.backend.list(&prefix)).await?;
        let listed = summaries.len();

        let views: Vec<ImageView> = futures::stream::iter(summaries)
            .map(|summary| async move {
                match self.view(&summary.key, user_id).await {
                    Ok(view) => Ok(Some(view)),
                    Err(VoteStoreError::RecordNotFound { key }) => {
                        debug!(key = %key, "image vanished while listing");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            })
            .buffered(self.config.list_concurrency.max(1))
            .try_filter_map(|view| async move { Ok::<_, VoteStoreError>(view) })
            .try_collect()
            .await?;

        debug!(listed, returned = views.len(), "listed region");
        Ok(views)
    }

    /// One image as `user_id` sees it.
    #[tracing::instrument(skip(self))]
    pub async fn get_record(&self, key: &str, user_id: Option<&str>) -> Result<ImageView> {
        validate_key(key)?;
        self.view(key, lookup_user(user_id)).await
    }

    async fn view(&self, key: &str, user_id: Option<&str>) -> Result<ImageView> {
        let object = self.call("get", self.backend.get(key)).await?;
        let record = self.decode(&object);
        let url = self
            .call(
                "presign_get",
                self.backend.presign_get(key, self.signed_url_expiry),
            )
            .await?;

        // The key carries the creation time; last_modified moves on every vote.
        let timestamp = key
            .parse::<ImageKey>()
            .ok()
            .and_then(|k| DateTime::from_timestamp_millis(k.created_at_ms as i64))
            .or(object.last_modified);

        Ok(ImageView {
            key: key.to_string(),
            url,
            timestamp,
            upvotes: record.upvotes,
            downvotes: record.downvotes,
            flagged: record.flagged,
            user_vote: user_id.and_then(|user_id| record.user_vote(user_id)),
        })
    }

    /// Record `vote` from `user_id`. Repeating the stored vote changes nothing
    /// and writes nothing.
    #[tracing::instrument(skip(self), fields(write_mode = %self.config.write_mode))]
    pub async fn apply_vote(&self, key: &str, vote: Vote, user_id: &str) -> Result<VoteOutcome> {
        validate_key(key)?;
        validate_user_id(user_id).map_err(VoteStoreError::invalid_input)?;

        let (record, change) = self
            .mutate(key, |record| {
                let change = record.apply_vote(user_id, vote);
                (change, !change.is_noop())
            })
            .await?;

        let (outcome, previous_vote) = match change {
            VoteChange::Cast => ("cast", None),
            VoteChange::Unchanged => ("unchanged", Some(vote)),
            VoteChange::Switched { from } => ("switched", Some(from)),
        };
        self.metrics.votes.add(
            1,
            &[
                KeyValue::new("vote", vote.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
        debug!(
            outcome,
            upvotes = record.upvotes,
            downvotes = record.downvotes,
            "applied vote"
        );

        Ok(VoteOutcome {
            upvotes: record.upvotes,
            downvotes: record.downvotes,
            user_vote: vote,
            previous_vote,
        })
    }

    /// Mark an image flagged. Flagging twice is the same as flagging once.
    #[tracing::instrument(skip(self), fields(write_mode = %self.config.write_mode))]
    pub async fn apply_flag(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let (_, newly_flagged) = self
            .mutate(key, |record| {
                let changed = record.apply_flag();
                (changed, changed)
            })
            .await?;
        self.metrics
            .flags
            .add(1, &[KeyValue::new("newly_flagged", newly_flagged)]);
        if newly_flagged {
            info!(key, "image flagged");
        }
        Ok(())
    }

    /// Read the record, let `apply` change it, and write the metadata back.
    ///
    /// `apply` returns its result and whether the record changed; an
    /// unchanged record is not written. In conditional mode the write is
    /// bound to the ETag that was read and the whole round is repeated when
    /// another writer got there first.
    async fn mutate<T, F>(&self, key: &str, mut apply: F) -> Result<(VoteRecord, T)>
    where
        F: FnMut(&mut VoteRecord) -> (T, bool),
    {
        let attempts = match self.config.write_mode {
            WriteMode::Conditional => self.config.max_write_attempts.max(1),
            WriteMode::LastWriterWins => 1,
        };

        for attempt in 1..=attempts {
            let object = self.call("get", self.backend.get(key)).await?;
            let mut record = self.decode(&object);
            let (result, changed) = apply(&mut record);
            if !changed {
                return Ok((record, result));
            }

            let if_match = match self.config.write_mode {
                WriteMode::Conditional => {
                    if object.e_tag.is_none() {
                        debug!(key, "backend returned no etag, writing unconditionally");
                    }
                    object.e_tag.clone()
                }
                WriteMode::LastWriterWins => None,
            };
            let update = MetadataUpdate::new(codec::merge_into(&object.metadata, &record))
                .with_content_type(object.content_type.clone())
                .with_if_match(if_match);

            match self
                .call(
                    "copy_replace_metadata",
                    self.backend.copy_replace_metadata(key, update),
                )
                .await
            {
                Ok(()) => return Ok((record, result)),
                Err(err) if err.is_precondition_failed() => {
                    self.metrics.write_conflicts.add(1, &[]);
                    debug!(key, attempt, "metadata changed underneath, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(key, attempts, "giving up on contended image");
        Err(VoteStoreError::WriteConflict {
            key: key.to_string(),
            attempts,
        })
    }
}

/// Reads only look the id up, so an id no vote could have been stored under
/// simply has no vote.
fn lookup_user(user_id: Option<&str>) -> Option<&str> {
    user_id.filter(|user_id| match validate_user_id(user_id) {
        Ok(()) => true,
        Err(err) => {
            debug!(%err, "ignoring unusable user id");
            false
        }
    })
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VoteStoreError::invalid_input("image key cannot be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(VoteStoreError::invalid_input(format!(
            "image key cannot exceed {} bytes",
            MAX_KEY_LEN
        )));
    }
    Ok(())
}
