//! Capability seams consumed by the pipeline
//!
//! The pipeline only sees these three traits. Concrete sources, processors and
//! persisters live in `sources`, `processors` and `store`.

use async_trait::async_trait;

use mediavec_common::types::Record;

use crate::error::{PersistError, RemoteError, SourceError};

/// Produces input records one at a time.
///
/// The pipeline pulls only after it holds a free slot, so a source is never
/// polled while the pipeline is saturated.
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, a per-row error, or `None` once the source is exhausted.
    ///
    /// A non-recoverable error ends the stream; the source is not polled again.
    async fn next_record(&mut self) -> Option<Result<Record, SourceError>>;

    /// Short name used in log lines
    fn describe(&self) -> String;
}

/// One asynchronous external unit of work per record
#[async_trait]
pub trait RemoteProcessor: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Perform the remote call. No retries; a failure abandons the record.
    async fn process(&self, record: &Record) -> Result<Self::Output, RemoteError>;
}

/// Writes one record's derived output in a single transaction
#[async_trait]
pub trait Persister<T>: Send + Sync + 'static {
    /// Persist everything derived from `record` atomically.
    ///
    /// # Returns
    /// Number of rows written
    async fn persist(&self, record: &Record, output: &T) -> Result<usize, PersistError>;
}
