//! Append-only failure log
//!
//! Every abandoned record and failed job is appended as one JSON line
//! (`timestamp`, `message`, `stack`). Writes go through a
//! `tracing_appender` non-blocking worker, so callers never wait on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

use crate::error::{CommonError, Result};

/// One line of the failure log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Error followed by its `source()` chain, one cause per line
    pub stack: String,
}

/// Handle to the failure log; clones share one background writer.
///
/// Buffered entries are flushed when the last clone is dropped.
#[derive(Clone)]
pub struct ErrorLog {
    writer: NonBlocking,
    path: PathBuf,
    _guard: Arc<WorkerGuard>,
}

impl ErrorLog {
    /// Open (or create) the log file at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                CommonError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("error log path has no file name: {}", path.display()),
                ))
            })?
            .to_owned();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let appender = tracing_appender::rolling::never(&dir, file_name);
        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("mediavec-error-log")
            .finish(appender);

        Ok(Self {
            writer,
            path,
            _guard: Arc::new(guard),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry for `error`, walking its `source()` chain into `stack`
    pub fn record(&self, message: impl Into<String>, error: &(dyn std::error::Error + 'static)) {
        self.append(ErrorEntry {
            timestamp: Utc::now(),
            message: message.into(),
            stack: error_stack(error),
        });
    }

    /// Append an entry for an `anyhow` error (uses its `{:?}` report as the stack)
    pub fn record_anyhow(&self, message: impl Into<String>, error: &anyhow::Error) {
        self.append(ErrorEntry {
            timestamp: Utc::now(),
            message: message.into(),
            stack: format!("{:?}", error),
        });
    }

    fn append(&self, entry: ErrorEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize error log entry");
                return;
            },
        };

        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(format!("{}\n", line).as_bytes()) {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to append to error log");
        }
    }
}

/// Read back every entry in an error log file
pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<ErrorEntry>> {
    let content = match std::fs::read_to_string(path.as_ref()) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(CommonError::from))
        .collect()
}

fn error_stack(error: &(dyn std::error::Error + 'static)) -> String {
    let mut stack = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        stack.push_str("\ncaused by: ");
        stack.push_str(&cause.to_string());
        source = cause.source();
    }
    stack
}
