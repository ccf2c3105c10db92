//! Blob backend adapter for the gallery.
//!
//! The vote store treats the object store as its only database. Everything it
//! needs is expressed through the [`BlobBackend`] trait:
//!
//! - `put` an object with a content type and a small string metadata map
//! - `get` the metadata (plus ETag, content type and timestamp) of one object
//! - `list` the objects whose key starts with a prefix
//! - `copy_replace_metadata`, rewriting the metadata map of an existing object
//! - `presign_get`, a time limited read URL for one object
//!
//! Two backends are provided: [`S3Backend`] talks to any S3 compatible
//! service through `aws-sdk-s3`, and [`ObjectStoreBackend`] wraps an
//! `object_store` implementation (in-memory for tests and local runs).

mod backends;
mod config;
mod error;
mod object;
mod presign;
mod traits;

pub use backends::{generic::ObjectStoreBackend, s3::S3Backend};
pub use config::{BackendKind, BlobStorageConfig};
pub use error::{BlobError, BlobResult};
pub use object::{Metadata, MetadataUpdate, ObjectSummary, StoredObject};
pub use presign::{validate_expiry, MAX_PRESIGN_EXPIRY};
pub use traits::BlobBackend;
