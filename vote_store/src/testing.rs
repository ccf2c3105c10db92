use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use blob_store::{
    BlobBackend,
    BlobError,
    BlobResult,
    Metadata,
    MetadataUpdate,
    ObjectStoreBackend,
    ObjectSummary,
    StoredObject,
};
use bytes::Bytes;
use data_model::{codec, Vote};

/// In-memory backend that can be told to misbehave.
pub struct FaultyBackend {
    inner: ObjectStoreBackend,
    /// Rival votes to slip in ahead of the next metadata writes.
    pending_races: AtomicU32,
    races_run: AtomicU32,
    ghosts: Mutex<Vec<String>>,
    failing_keys: Mutex<HashSet<String>>,
    get_delay: Mutex<Option<Duration>>,
    conditional_metadata: bool,
    if_matches: Mutex<Vec<Option<String>>>,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self {
            inner: ObjectStoreBackend::in_memory(),
            pending_races: AtomicU32::new(0),
            races_run: AtomicU32::new(0),
            ghosts: Mutex::new(Vec::new()),
            failing_keys: Mutex::new(HashSet::new()),
            get_delay: Mutex::new(None),
            conditional_metadata: true,
            if_matches: Mutex::new(Vec::new()),
        }
    }

    /// Report metadata writes as unconditional, the way S3 behaves.
    pub fn without_conditional_metadata(mut self) -> Self {
        self.conditional_metadata = false;
        self
    }

    /// The `if_match` of every metadata write the store has sent.
    pub fn sent_if_matches(&self) -> Vec<Option<String>> {
        self.if_matches.lock().unwrap().clone()
    }

    /// Before each of the next `count` metadata writes, another user's up
    /// vote lands on the same object.
    pub fn race_next_writes(&self, count: u32) {
        self.pending_races.store(count, Ordering::SeqCst);
    }

    /// List `key` although no object exists for it.
    pub fn add_ghost(&self, key: &str) {
        self.ghosts.lock().unwrap().push(key.to_string());
    }

    pub fn fail_gets_for(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    async fn rival_vote(&self, key: &str) -> BlobResult<()> {
        let rival = format!("rival-{}", self.races_run.fetch_add(1, Ordering::SeqCst));
        let object = self.inner.get(key).await?;
        let mut record = codec::decode(&object.metadata).record;
        record.apply_vote(&rival, Vote::Up);
        self.inner
            .copy_replace_metadata(
                key,
                MetadataUpdate::new(codec::merge_into(&object.metadata, &record)),
            )
            .await
    }
}

#[async_trait]
impl BlobBackend for FaultyBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> BlobResult<()> {
        self.inner.put(key, data, content_type, metadata).await
    }

    async fn get(&self, key: &str) -> BlobResult<StoredObject> {
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(BlobError::NetworkError {
                source: anyhow::anyhow!("connection reset"),
            });
        }
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> BlobResult<Vec<ObjectSummary>> {
        let mut summaries = self.inner.list(prefix).await?;
        for ghost in self.ghosts.lock().unwrap().iter() {
            if ghost.starts_with(prefix) {
                summaries.push(ObjectSummary {
                    key: ghost.clone(),
                    last_modified: None,
                });
            }
        }
        Ok(summaries)
    }

    async fn copy_replace_metadata(&self, key: &str, update: MetadataUpdate) -> BlobResult<()> {
        self.if_matches.lock().unwrap().push(update.if_match.clone());
        let raced = self
            .pending_races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if raced {
            self.rival_vote(key).await?;
        }
        self.inner.copy_replace_metadata(key, update).await
    }

    fn supports_conditional_metadata(&self) -> bool {
        self.conditional_metadata
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> BlobResult<String> {
        self.inner.presign_get(key, expires_in).await
    }
}
