//! The three ingestion jobs
//!
//! - [`import_file`]: one TSV file, fetch-and-store per row
//! - [`embed_pending_images`]: stream rows without an embedding and fill them in
//! - [`embed_video`]: one video, one row per segment, one transaction
//!
//! Each job builds its own gate, so jobs never share capacity.

use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use mediavec_common::error_log::ErrorLog;
use mediavec_common::types::{Locator, MediaKind, Record, RecordId};
use mediavec_common::CommonError;

use crate::embedding::EmbeddingService;
use crate::error::{IngestError, Result};
use crate::framework::{ConcurrencyGate, Job, Pipeline, PipelineReport};
use crate::processors::{EmbeddingPersister, EmbeddingProcessor, ImportProcessor, MediaPersister};
use crate::sources::{StreamSource, TsvSource};
use crate::store::{MediaFilter, ObjectStore, VectorStore};

/// Import every row of one TSV file
pub async fn import_file<O, V>(
    path: &Path,
    objects: Arc<O>,
    vectors: Arc<V>,
    concurrency: usize,
    error_log: Option<ErrorLog>,
) -> Result<PipelineReport>
where
    O: ObjectStore,
    V: VectorStore,
{
    let gate = ConcurrencyGate::new(concurrency)?;
    let mut source = TsvSource::open(path).await.map_err(|source| IngestError::Source {
        source,
        report: PipelineReport::default(),
    })?;

    let mut pipeline = Pipeline::new(
        path.display().to_string(),
        Arc::new(ImportProcessor::new(objects)),
        Arc::new(MediaPersister::new(vectors)),
        gate,
    );
    if let Some(log) = error_log {
        pipeline = pipeline.with_error_log(log);
    }

    pipeline.run(&mut source).await
}

/// Build one job per input file, keeping the given order
pub fn import_jobs<P: AsRef<Path>>(paths: &[P]) -> Vec<Job> {
    paths.iter().map(|p| Job::for_file(p.as_ref())).collect()
}

/// Embed every stored image that has no embedding yet
pub async fn embed_pending_images<E, V>(
    service: Arc<E>,
    vectors: Arc<V>,
    concurrency: usize,
    error_log: Option<ErrorLog>,
) -> Result<PipelineReport>
where
    E: EmbeddingService,
    V: VectorStore,
{
    let gate = ConcurrencyGate::new(concurrency)?;
    let mut source = StreamSource::new(
        "pending image embeddings",
        vectors.query_stream(MediaFilter::PendingEmbedding),
    );

    let mut pipeline = Pipeline::new(
        "embed-images",
        Arc::new(EmbeddingProcessor::new(service)),
        Arc::new(EmbeddingPersister::new(Arc::clone(&vectors))),
        gate,
    );
    if let Some(log) = error_log {
        pipeline = pipeline.with_error_log(log);
    }

    pipeline.run(&mut source).await
}

/// Record for a video at `locator`, identified by its file stem
pub fn video_record(locator: Locator, description: Option<String>) -> Result<Record> {
    let stem = locator
        .file_stem()
        .ok_or_else(|| CommonError::invalid_locator(locator.to_string(), "no file name"))?;
    let id = RecordId::new(stem)?;

    let description = description.unwrap_or_else(|| stem.to_string());
    Ok(Record::new(id, locator, MediaKind::Video).with_description(description))
}

/// Embed one video and write all of its segments in a single transaction
pub async fn embed_video<E, V>(
    locator: Locator,
    description: Option<String>,
    service: Arc<E>,
    vectors: Arc<V>,
    error_log: Option<ErrorLog>,
) -> Result<PipelineReport>
where
    E: EmbeddingService,
    V: VectorStore,
{
    let record = video_record(locator, description)?;
    info!(record_id = %record.id, locator = %record.locator, "Embedding video");

    let mut source = StreamSource::new(
        record.locator.to_string(),
        stream::iter(std::iter::once(Ok(record))).boxed(),
    );

    let mut pipeline = Pipeline::new(
        "embed-video",
        Arc::new(EmbeddingProcessor::new(service)),
        Arc::new(EmbeddingPersister::new(vectors)),
        ConcurrencyGate::new(1)?,
    );
    if let Some(log) = error_log {
        pipeline = pipeline.with_error_log(log);
    }

    pipeline.run(&mut source).await
}
