//! Postgres-backed `media` table
//!
//! Embeddings are stored as `REAL[]`. Every write is an upsert keyed by `id`,
//! so re-running a job converges to the same rows.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::{debug, instrument};

use mediavec_common::types::{Locator, MediaKind, Record, RecordId};

use super::{MediaFilter, MediaRow, VectorStore};
use crate::error::{PersistError, SourceError};

const PENDING_EMBEDDING_SQL: &str = "SELECT id, storage_path FROM media \
     WHERE embedding IS NULL AND storage_path IS NOT NULL AND start_offset_sec IS NULL";

const UPSERT_CONFLICT_SQL: &str = " ON CONFLICT (id) DO UPDATE SET \
     image_url = COALESCE(EXCLUDED.image_url, media.image_url), \
     storage_path = COALESCE(EXCLUDED.storage_path, media.storage_path), \
     description = COALESCE(EXCLUDED.description, media.description), \
     embedding = COALESCE(EXCLUDED.embedding, media.embedding), \
     start_offset_sec = COALESCE(EXCLUDED.start_offset_sec, media.start_offset_sec), \
     end_offset_sec = COALESCE(EXCLUDED.end_offset_sec, media.end_offset_sec), \
     updated_at = NOW()";

#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn pending_row_to_record(row: u64, id: String, storage_path: String) -> Result<Record, SourceError> {
    let id = RecordId::new(id).map_err(|e| SourceError::malformed(row, e.to_string()))?;
    let locator =
        Locator::parse(&storage_path).map_err(|e| SourceError::malformed(row, e.to_string()))?;
    Ok(Record::new(id, locator, MediaKind::Image))
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn query_stream(&self, filter: MediaFilter) -> BoxStream<'_, Result<Record, SourceError>> {
        let sql = match filter {
            MediaFilter::PendingEmbedding => PENDING_EMBEDDING_SQL,
        };

        sqlx::query_as::<_, (String, String)>(sql)
            .fetch(&self.pool)
            .enumerate()
            .map(|(index, row)| {
                let (id, storage_path) = row?;
                pending_row_to_record(index as u64 + 1, id, storage_path)
            })
            .boxed()
    }

    #[instrument(skip_all, fields(rows = rows.len()))]
    async fn transactional_update(&self, rows: &[MediaRow]) -> Result<usize, PersistError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Postgres refuses to upsert the same key twice in one statement
        let mut seen = HashSet::with_capacity(rows.len());
        if let Some(dup) = rows.iter().find(|row| !seen.insert(&row.id)) {
            return Err(PersistError::Rejected(format!(
                "duplicate row id {} in one update",
                dup.id
            )));
        }

        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO media \
             (id, image_url, storage_path, description, embedding, start_offset_sec, end_offset_sec) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.id.as_str().to_owned())
                .push_bind(row.image_url.clone())
                .push_bind(row.storage_path.clone())
                .push_bind(row.description.clone())
                .push_bind(row.embedding.clone())
                .push_bind(row.segment.map(|s| s.start_offset_sec))
                .push_bind(row.segment.map(|s| s.end_offset_sec));
        });
        builder.push(UPSERT_CONFLICT_SQL);

        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(affected = result.rows_affected(), "Media rows upserted");

        Ok(rows.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_row_to_record() {
        let record =
            pending_row_to_record(1, "abc".to_string(), "s3://images/abc.jpg".to_string()).unwrap();
        assert_eq!(record.id.as_str(), "abc");
        assert_eq!(record.locator.to_string(), "s3://images/abc.jpg");
        assert_eq!(record.kind, MediaKind::Image);
    }

    #[test]
    fn test_unparseable_storage_path_is_malformed_row() {
        let err = pending_row_to_record(7, "abc".to_string(), "/local/abc.jpg".to_string())
            .unwrap_err();
        assert!(matches!(err, SourceError::MalformedRow { line: 7, .. }));
    }
}
