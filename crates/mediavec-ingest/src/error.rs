//! Error taxonomy for the ingestion pipeline
//!
//! Per-record errors ([`RemoteError`], [`PersistError`], recoverable
//! [`SourceError`]s) stop at the record's finalizer. Stream-level and job-level
//! errors surface to the caller.

use std::time::Duration;
use thiserror::Error;

use crate::framework::PipelineReport;

/// Result type alias for pipeline and orchestrator operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// The record stream itself failed, or produced an unusable row
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TSV: {0}")]
    Tsv(#[from] csv_async::Error),

    #[error("Database stream failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed row {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    #[error("Record {id} was already admitted in this run")]
    DuplicateRecord { id: String },
}

impl SourceError {
    /// A malformed or repeated row is skipped; anything else ends the stream
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SourceError::MalformedRow { .. } | SourceError::DuplicateRecord { .. }
        )
    }

    pub fn malformed(line: u64, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            line,
            reason: reason.into(),
        }
    }
}

/// One record's external computation failed
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Unsupported record: {0}")]
    Unsupported(String),
}

impl RemoteError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// One record's transactional write failed
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database write failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// A whole partitioned job failed
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to launch worker for job {job}: {source}")]
    Spawn {
        job: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker for job {job} exited with {code:?}")]
    Exit { job: String, code: Option<i32> },

    #[error("Worker for job {job} finished without a completion message")]
    MissingCompletion { job: String },

    #[error("Job {job} panicked: {message}")]
    Panicked { job: String, message: String },

    #[error("Job {job} failed: {message}")]
    Failed { job: String, message: String },
}

impl JobError {
    pub fn failed(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            job: job.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by pipelines and orchestrators
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Record source failed after {} records: {source}", .report.admitted)]
    Source {
        #[source]
        source: SourceError,
        report: PipelineReport,
    },

    #[error("All {0} jobs failed")]
    AllJobsFailed(usize),

    #[error("Concurrency limit must be greater than 0")]
    ZeroLimit,

    #[error("Concurrency gate closed")]
    GateClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] mediavec_common::CommonError),
}
