//! Fetch-and-store: copy origin media into the bucket and record it

use async_trait::async_trait;
use std::sync::Arc;

use mediavec_common::types::{Locator, Record};

use crate::error::{PersistError, RemoteError};
use crate::framework::{Persister, RemoteProcessor};
use crate::store::{MediaRow, ObjectStore, StoredObject, VectorStore};

pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Result of importing one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub origin: Locator,
    pub stored: StoredObject,
}

/// Downloads a record's origin URL and uploads it as `{id}.jpg`
pub struct ImportProcessor<O> {
    store: Arc<O>,
}

impl<O: ObjectStore> ImportProcessor<O> {
    pub fn new(store: Arc<O>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<O: ObjectStore> RemoteProcessor for ImportProcessor<O> {
    type Output = StoredMedia;

    async fn process(&self, record: &Record) -> Result<StoredMedia, RemoteError> {
        let data = self.store.fetch(&record.locator).await?;
        let name = format!("{}.jpg", record.id);
        let stored = self.store.put(data, &name, IMAGE_CONTENT_TYPE).await?;

        Ok(StoredMedia {
            origin: record.locator.clone(),
            stored,
        })
    }
}

/// Upserts the imported row: origin URL as read, description and storage path
pub struct MediaPersister<V> {
    store: Arc<V>,
}

impl<V: VectorStore> MediaPersister<V> {
    pub fn new(store: Arc<V>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<V: VectorStore> Persister<StoredMedia> for MediaPersister<V> {
    async fn persist(&self, record: &Record, media: &StoredMedia) -> Result<usize, PersistError> {
        let image_url = record
            .origin_url
            .clone()
            .unwrap_or_else(|| media.origin.public_url());
        let row = MediaRow::new(record.id.clone())
            .with_image_url(image_url)
            .with_storage_path(media.stored.locator.to_string())
            .with_description(record.description.clone());

        self.store.transactional_update(&[row]).await
    }
}
