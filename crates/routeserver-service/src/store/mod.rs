//! Access to the persistent object store holding the serialized routing data.
//!
//! Objects are scoped by organization: the same object id names different objects for different
//! organizations.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::caching::CacheError;
use crate::types::Identity;

mod filesystem;
mod memory;

pub use filesystem::FilesystemObjectStore;
pub use memory::InMemoryObjectStore;

/// Information about a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Size of the object in bytes.
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The contents of a stored object along with its metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("invalid object id `{0}`")]
    InvalidObjectId(String),
    #[error("object store I/O failed")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CacheError::NotFound,
            StoreError::InvalidObjectId(_) => CacheError::NotFound,
            StoreError::Io(err) => CacheError::LoadFailed(err.to_string()),
        }
    }
}

/// Persistent storage of serialized objects.
pub trait ObjectStore: Send + Sync + 'static {
    /// Retrieves the object `object_id` as visible to `identity`.
    fn retrieve<'a>(
        &'a self,
        object_id: &'a str,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<StoredObject, StoreError>>;

    /// Stores `data` as object `object_id` of the organization of `identity`.
    fn store<'a>(
        &'a self,
        object_id: &'a str,
        identity: &'a Identity,
        data: Bytes,
    ) -> BoxFuture<'a, Result<ObjectMetadata, StoreError>>;
}

pub type ObjectStoreRef = Arc<dyn ObjectStore>;

/// Checks that `id` is a single, non-hidden path component.
fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidObjectId(id.to_owned()))
    }
}
