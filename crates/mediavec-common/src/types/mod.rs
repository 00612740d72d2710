//! Common types used across mediavec

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{CommonError, Result};

/// Stable record identifier, used as the primary key of persisted rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Accept an identifier supplied by a source (e.g. a stored `id` column)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CommonError::InvalidIdentifier(
                "identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub(crate) fn from_hash(hex: String) -> Self {
        Self(hex)
    }

    /// Identifier of one time window of a segmented result: `{base}_{start}_{end}`
    pub fn segment(&self, segment: &Segment) -> Self {
        Self(format!(
            "{}_{}_{}",
            self.0, segment.start_offset_sec, segment.end_offset_sec
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of media a record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl FromStr for MediaKind {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(CommonError::InvalidMediaKind(s.to_string())),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object store flavour of a bucket locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketScheme {
    S3,
    Gcs,
}

impl BucketScheme {
    fn prefix(&self) -> &'static str {
        match self {
            BucketScheme::S3 => "s3://",
            BucketScheme::Gcs => "gs://",
        }
    }
}

/// Where a piece of media lives: an origin URL or a bucket object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    Http(Url),
    Bucket {
        scheme: BucketScheme,
        bucket: String,
        key: String,
    },
}

impl Locator {
    /// Parse `http(s)://...`, `s3://bucket/key` or `gs://bucket/key`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();

        for scheme in [BucketScheme::S3, BucketScheme::Gcs] {
            if let Some(rest) = raw.strip_prefix(scheme.prefix()) {
                let (bucket, key) = rest
                    .split_once('/')
                    .ok_or_else(|| CommonError::invalid_locator(raw, "missing object key"))?;
                if bucket.is_empty() || key.is_empty() {
                    return Err(CommonError::invalid_locator(raw, "empty bucket or key"));
                }
                return Ok(Locator::Bucket {
                    scheme,
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
        }

        let url = Url::parse(raw).map_err(|e| CommonError::invalid_locator(raw, e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(Locator::Http(url)),
            other => Err(CommonError::invalid_locator(
                raw,
                format!("unsupported scheme '{}'", other),
            )),
        }
    }

    /// Build an `s3://` locator for an object in `bucket`
    pub fn s3(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Locator::Bucket {
            scheme: BucketScheme::S3,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Publicly addressable https form of this locator
    pub fn public_url(&self) -> String {
        match self {
            Locator::Http(url) => url.to_string(),
            Locator::Bucket {
                scheme: BucketScheme::Gcs,
                bucket,
                key,
            } => format!("https://storage.googleapis.com/{}/{}", bucket, key),
            Locator::Bucket {
                scheme: BucketScheme::S3,
                bucket,
                key,
            } => format!("https://{}.s3.amazonaws.com/{}", bucket, key),
        }
    }

    /// Last path segment (`BigBuckBunny.mp4`)
    pub fn file_name(&self) -> Option<&str> {
        let path = match self {
            Locator::Http(url) => url.path(),
            Locator::Bucket { key, .. } => key.as_str(),
        };
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Last path segment without its extension (`BigBuckBunny`)
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.file_name()?;
        let stem = name.split('.').next().unwrap_or(name);
        if stem.is_empty() {
            None
        } else {
            Some(stem)
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Http(url) => write!(f, "{}", url),
            Locator::Bucket {
                scheme,
                bucket,
                key,
            } => write!(f, "{}{}/{}", scheme.prefix(), bucket, key),
        }
    }
}

impl FromStr for Locator {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Locator::parse(s)
    }
}

impl TryFrom<String> for Locator {
    type Error = CommonError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Locator::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(value: Locator) -> Self {
        value.to_string()
    }
}

/// One unit of input work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Origin URL (import) or storage locator (embedding)
    pub locator: Locator,
    pub kind: MediaKind,
    pub description: Option<String>,
    /// Origin URL exactly as the source spelled it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    /// 1-based row number in the source file, when file-backed
    pub source_offset: Option<u64>,
}

impl Record {
    pub fn new(id: RecordId, locator: Locator, kind: MediaKind) -> Self {
        Self {
            id,
            locator,
            kind,
            description: None,
            origin_url: None,
            source_offset: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_origin_url(mut self, url: impl Into<String>) -> Self {
        self.origin_url = Some(url.into());
        self
    }

    pub fn with_source_offset(mut self, offset: u64) -> Self {
        self.source_offset = Some(offset);
        self
    }
}

/// Time window of a segmented (video) embedding, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_offset_sec: i64,
    pub end_offset_sec: i64,
}

impl Segment {
    pub fn new(start_offset_sec: i64, end_offset_sec: i64) -> Self {
        Self {
            start_offset_sec,
            end_offset_sec,
        }
    }
}

/// Output of the embedding computation for one record (or one segment of it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedResult {
    /// Row identifier: the record id, or `{id}_{start}_{end}` for segments
    pub id: RecordId,
    pub vector: Vec<f32>,
    pub segment: Option<Segment>,
}

impl DerivedResult {
    pub fn whole(id: RecordId, vector: Vec<f32>) -> Self {
        Self {
            id,
            vector,
            segment: None,
        }
    }

    pub fn segmented(base: &RecordId, segment: Segment, vector: Vec<f32>) -> Self {
        Self {
            id: base.segment(&segment),
            vector,
            segment: Some(segment),
        }
    }
}
