//! Records arriving from an incremental query
//!
//! Wraps any stream of records, typically the row stream of
//! [`VectorStore::query_stream`](crate::store::VectorStore::query_stream).
//! Rows are pulled lazily, one per free slot.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use mediavec_common::types::Record;

use crate::error::SourceError;
use crate::framework::RecordSource;

pub struct StreamSource<'a> {
    name: String,
    rows: BoxStream<'a, Result<Record, SourceError>>,
    pulled: u64,
    finished: bool,
}

impl<'a> StreamSource<'a> {
    pub fn new(name: impl Into<String>, rows: BoxStream<'a, Result<Record, SourceError>>) -> Self {
        Self {
            name: name.into(),
            rows,
            pulled: 0,
            finished: false,
        }
    }

    /// Items pulled so far, including per-row errors
    pub fn pulled(&self) -> u64 {
        self.pulled
    }
}

#[async_trait]
impl<'a> RecordSource for StreamSource<'a> {
    async fn next_record(&mut self) -> Option<Result<Record, SourceError>> {
        if self.finished {
            return None;
        }

        match self.rows.next().await {
            None => {
                self.finished = true;
                None
            },
            Some(item) => {
                self.pulled += 1;
                if matches!(&item, Err(e) if !e.is_recoverable()) {
                    self.finished = true;
                }
                Some(item)
            },
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
