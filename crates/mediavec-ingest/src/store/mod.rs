//! Durable stores: the object store holding media bytes and the vector store
//! holding `media` rows.

pub mod media;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use mediavec_common::types::{Record, RecordId, Segment};

use crate::error::{PersistError, SourceError};

pub use media::{ObjectStore, S3MediaStore, StoredObject};
pub use postgres::PgVectorStore;

/// Which rows a query stream yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFilter {
    /// Whole-image rows that have a storage path but no embedding yet
    PendingEmbedding,
}

/// One row of the `media` table.
///
/// `None` columns are left untouched when the row already exists, so an
/// embedding-only update never clears the import columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRow {
    pub id: RecordId,
    pub image_url: Option<String>,
    pub storage_path: Option<String>,
    pub description: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub segment: Option<Segment>,
}

impl MediaRow {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            image_url: None,
            storage_path: None,
            description: None,
            embedding: None,
            segment: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segment = Some(segment);
        self
    }
}

/// Row store with incremental reads and all-or-nothing writes
#[async_trait]
pub trait VectorStore: Send + Sync + 'static {
    /// Stream records matching `filter` in the order the store returns them
    fn query_stream(&self, filter: MediaFilter) -> BoxStream<'_, Result<Record, SourceError>>;

    /// Upsert every row in one transaction. Either all rows are written or none.
    async fn transactional_update(&self, rows: &[MediaRow]) -> Result<usize, PersistError>;
}
