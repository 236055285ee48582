use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};

use super::{ObjectMetadata, ObjectStore, StoreError, StoredObject, validate_id};
use crate::types::Identity;

/// An [`ObjectStore`] keeping everything in memory, for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across all organizations.
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn retrieve<'a>(
        &'a self,
        object_id: &'a str,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<StoredObject, StoreError>> {
        let result = validate_id(object_id).and_then(|()| {
            let key = (identity.organization.clone(), object_id.to_owned());
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned()
                .ok_or(StoreError::NotFound)
        });
        future::ready(result).boxed()
    }

    fn store<'a>(
        &'a self,
        object_id: &'a str,
        identity: &'a Identity,
        data: Bytes,
    ) -> BoxFuture<'a, Result<ObjectMetadata, StoreError>> {
        let result = validate_id(object_id).map(|()| {
            let metadata = ObjectMetadata {
                size: data.len() as u64,
                last_modified: Some(Utc::now()),
            };
            let object = StoredObject {
                data,
                metadata: metadata.clone(),
            };
            let key = (identity.organization.clone(), object_id.to_owned());
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, object);
            metadata
        });
        future::ready(result).boxed()
    }
}
