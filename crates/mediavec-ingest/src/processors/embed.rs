//! Compute embeddings and write them back to the record's rows

use async_trait::async_trait;
use std::sync::Arc;

use mediavec_common::types::{DerivedResult, MediaKind, Record};

use crate::embedding::EmbeddingService;
use crate::error::{PersistError, RemoteError};
use crate::framework::{Persister, RemoteProcessor};
use crate::store::{MediaRow, VectorStore};

/// Calls the embedding service once per record
pub struct EmbeddingProcessor<E> {
    service: Arc<E>,
}

impl<E: EmbeddingService> EmbeddingProcessor<E> {
    pub fn new(service: Arc<E>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<E: EmbeddingService> RemoteProcessor for EmbeddingProcessor<E> {
    type Output = Vec<DerivedResult>;

    async fn process(&self, record: &Record) -> Result<Vec<DerivedResult>, RemoteError> {
        let embeddings = self.service.embed(&record.locator, record.kind).await?;

        match record.kind {
            MediaKind::Image => {
                let mut embeddings = embeddings.into_iter();
                match (embeddings.next(), embeddings.next()) {
                    (Some(embedding), None) => {
                        Ok(vec![DerivedResult::whole(record.id.clone(), embedding.vector)])
                    },
                    _ => Err(RemoteError::malformed("expected exactly one image embedding")),
                }
            },
            MediaKind::Video => embeddings
                .into_iter()
                .map(|embedding| {
                    let segment = embedding
                        .segment
                        .ok_or_else(|| RemoteError::malformed("video embedding without offsets"))?;
                    Ok(DerivedResult::segmented(&record.id, segment, embedding.vector))
                })
                .collect(),
        }
    }
}

/// Writes all of a record's results in one transaction.
///
/// Segment rows are new rows, so they also carry the media's locators and
/// description; whole-record results only fill the embedding column.
pub struct EmbeddingPersister<V> {
    store: Arc<V>,
}

impl<V: VectorStore> EmbeddingPersister<V> {
    pub fn new(store: Arc<V>) -> Self {
        Self { store }
    }
}

pub fn result_rows(record: &Record, results: &[DerivedResult]) -> Vec<MediaRow> {
    results
        .iter()
        .map(|result| {
            let row = MediaRow::new(result.id.clone()).with_embedding(result.vector.clone());
            match result.segment {
                Some(segment) => row
                    .with_segment(segment)
                    .with_image_url(record.locator.public_url())
                    .with_storage_path(record.locator.to_string())
                    .with_description(record.description.clone()),
                None => row,
            }
        })
        .collect()
}

#[async_trait]
impl<V: VectorStore> Persister<Vec<DerivedResult>> for EmbeddingPersister<V> {
    async fn persist(&self, record: &Record, results: &Vec<DerivedResult>) -> Result<usize, PersistError> {
        if results.is_empty() {
            return Err(PersistError::Rejected(format!("no results for record {}", record.id)));
        }
        self.store.transactional_update(&result_rows(record, results)).await
    }
}
