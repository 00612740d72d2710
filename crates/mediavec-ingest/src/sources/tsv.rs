//! Tab-separated import files
//!
//! Each row is `image_url<TAB>description`. The record id is the MD5 of the
//! description, so re-importing a file upserts the same rows.

use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tracing::debug;

use mediavec_common::checksum::content_id;
use mediavec_common::types::{Locator, MediaKind, Record};

use crate::error::SourceError;
use crate::framework::RecordSource;

/// Reads records from a TSV file in file order
pub struct TsvSource<R = tokio::fs::File> {
    name: String,
    reader: AsyncReader<R>,
    row: StringRecord,
    rows_read: u64,
    finished: bool,
}

impl TsvSource<tokio::fs::File> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        debug!(path = %path.display(), "Opened TSV source");
        Ok(Self::from_reader(path.display().to_string(), file))
    }
}

impl<R> TsvSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        // Descriptions routinely contain quote characters; treat every byte literally
        let reader = AsyncReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .create_reader(reader);

        Self {
            name: name.into(),
            reader,
            row: StringRecord::new(),
            rows_read: 0,
            finished: false,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn current_line(&self) -> u64 {
        self.row
            .position()
            .map(|p| p.line())
            .unwrap_or(self.rows_read)
    }
}

/// Turn one row into a record. `Ok(None)` for a blank row.
pub fn parse_row(line: u64, row: &StringRecord) -> Result<Option<Record>, SourceError> {
    if row.iter().all(|field| field.trim().is_empty()) {
        return Ok(None);
    }

    let url = row.get(0).map(str::trim).unwrap_or_default();
    let description = row.get(1).unwrap_or_default();

    if url.is_empty() {
        return Err(SourceError::malformed(line, "missing image URL"));
    }
    if description.trim().is_empty() {
        return Err(SourceError::malformed(line, "missing description"));
    }

    let locator = Locator::parse(url).map_err(|e| SourceError::malformed(line, e.to_string()))?;

    Ok(Some(
        Record::new(content_id(description), locator, MediaKind::Image)
            .with_description(description)
            .with_origin_url(url)
            .with_source_offset(line),
    ))
}

#[async_trait]
impl<R> RecordSource for TsvSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_record(&mut self) -> Option<Result<Record, SourceError>> {
        while !self.finished {
            match self.reader.read_record(&mut self.row).await {
                Ok(false) => self.finished = true,
                Ok(true) => {
                    self.rows_read += 1;
                    match parse_row(self.current_line(), &self.row) {
                        Ok(Some(record)) => return Some(Ok(record)),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                },
                Err(e) if e.is_io_error() => {
                    self.finished = true;
                    return Some(Err(SourceError::Tsv(e)));
                },
                Err(e) => {
                    self.rows_read += 1;
                    return Some(Err(SourceError::malformed(self.current_line(), e.to_string())));
                },
            }
        }
        None
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
