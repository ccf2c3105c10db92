//! Object descriptors returned by the backends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// User metadata attached to an object (`x-amz-meta-*` on S3).
pub type Metadata = HashMap<String, String>;

/// Everything the store reads about one object, minus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub metadata: Metadata,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Version tag used for conditional metadata replacement.
    pub e_tag: Option<String>,
    pub size_bytes: u64,
}

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A full replacement of an object's metadata map.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub metadata: Metadata,

    /// Content type to keep on the object. S3 resets it on a metadata
    /// replacing copy unless it is sent again.
    pub content_type: Option<String>,

    /// Only apply the update while the object still carries this ETag.
    pub if_match: Option<String>,
}

impl MetadataUpdate {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_if_match(mut self, e_tag: Option<String>) -> Self {
        self.if_match = e_tag;
        self
    }
}
