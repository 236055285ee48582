use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};

use super::{ObjectMetadata, ObjectStore, StoreError, StoredObject, validate_id};
use crate::types::Identity;

/// An [`ObjectStore`] keeping objects at `<root>/<organization>/<object_id>`.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, object_id: &str, identity: &Identity) -> Result<PathBuf, StoreError> {
        validate_id(object_id)?;
        validate_id(&identity.organization)?;
        Ok(self.root.join(&identity.organization).join(object_id))
    }

    async fn do_retrieve(
        &self,
        object_id: &str,
        identity: &Identity,
    ) -> Result<StoredObject, StoreError> {
        let path = self.path(object_id, identity)?;
        tracing::trace!("Reading object from {}", path.display());

        let data = tokio::fs::read(&path).await.map_err(not_found)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(not_found)?;

        Ok(StoredObject {
            data: Bytes::from(data),
            metadata: ObjectMetadata {
                size: metadata.len(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            },
        })
    }

    async fn do_store(
        &self,
        object_id: &str,
        identity: &Identity,
        data: Bytes,
    ) -> Result<ObjectMetadata, StoreError> {
        let path = self.path(object_id, identity)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers must never observe a partially written object.
        let temp_path = path.with_file_name(format!(".{object_id}.{}", uuid::Uuid::new_v4()));
        let size = data.len() as u64;
        if let Err(err) = tokio::fs::write(&temp_path, &data).await {
            tokio::fs::remove_file(&temp_path).await.ok();
            return Err(err.into());
        }
        tokio::fs::rename(&temp_path, &path).await?;
        tracing::debug!(object_id, size, "Stored object at {}", path.display());

        Ok(ObjectMetadata {
            size,
            last_modified: Some(Utc::now()),
        })
    }
}

fn not_found(err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound,
        _ => StoreError::Io(err),
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn retrieve<'a>(
        &'a self,
        object_id: &'a str,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<StoredObject, StoreError>> {
        self.do_retrieve(object_id, identity).boxed()
    }

    fn store<'a>(
        &'a self,
        object_id: &'a str,
        identity: &'a Identity,
        data: Bytes,
    ) -> BoxFuture<'a, Result<ObjectMetadata, StoreError>> {
        self.do_store(object_id, identity, data).boxed()
    }
}
