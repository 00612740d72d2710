//! HTTP client for a multimodal embedding `predict` endpoint
//!
//! Request: `{"instances":[{"image":{"gcsUri":"gs://..."}}]}` (or `video`),
//! with an optional `parameters.dimension`. Response:
//! `predictions[0].imageEmbedding` for images, and
//! `predictions[0].videoEmbeddings[]` (`startOffsetSec`, `endOffsetSec`,
//! `embedding`) for videos.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use mediavec_common::types::{Locator, MediaKind, Segment};

use super::credentials::CredentialSupplier;
use crate::config::EmbeddingConfig;
use crate::error::RemoteError;

/// One vector returned by the service; video vectors carry their time window
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub segment: Option<Segment>,
}

#[async_trait]
pub trait EmbeddingService: Send + Sync + 'static {
    /// Embed the media at `locator`. Images yield one vector, videos one per segment.
    async fn embed(&self, locator: &Locator, kind: MediaKind) -> Result<Vec<Embedding>, RemoteError>;
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<Instance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Parameters>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Instance {
    Image(MediaRef),
    Video(MediaRef),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaRef {
    gcs_uri: String,
}

#[derive(Debug, Serialize)]
struct Parameters {
    dimension: u32,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    image_embedding: Option<Vec<f32>>,
    video_embeddings: Option<Vec<VideoEmbedding>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoEmbedding {
    // Zero offsets are omitted from the JSON
    #[serde(default)]
    start_offset_sec: i64,
    #[serde(default)]
    end_offset_sec: i64,
    embedding: Vec<f32>,
}

pub struct EmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Arc<dyn CredentialSupplier>,
    dimension: Option<u32>,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Arc<dyn CredentialSupplier>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RemoteError::Http)?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            credentials,
            dimension: None,
            timeout,
        })
    }

    pub fn from_config(
        config: &EmbeddingConfig,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> Result<Self, RemoteError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            RemoteError::Unsupported("EMBEDDING_ENDPOINT is not configured".to_string())
        })?;
        let mut client = Self::new(endpoint, credentials, Duration::from_secs(config.timeout_secs))?;
        client.dimension = config.dimension;
        Ok(client)
    }

    /// Request lower-dimensional vectors (image embeddings only)
    pub fn with_dimension(mut self, dimension: u32) -> Self {
        self.dimension = Some(dimension);
        self
    }

    fn request_body(&self, locator: &Locator, kind: MediaKind) -> Result<PredictRequest, RemoteError> {
        let gcs_uri = match locator {
            Locator::Bucket { .. } => locator.to_string(),
            Locator::Http(_) => {
                return Err(RemoteError::Unsupported(format!(
                    "embedding needs a bucket locator, got {}",
                    locator
                )))
            },
        };

        let media = MediaRef { gcs_uri };
        let (instance, parameters) = match kind {
            MediaKind::Image => (
                Instance::Image(media),
                self.dimension.map(|dimension| Parameters { dimension }),
            ),
            MediaKind::Video => (Instance::Video(media), None),
        };

        Ok(PredictRequest {
            instances: vec![instance],
            parameters,
        })
    }

    fn map_http_error(&self, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout {
                url: self.endpoint.clone(),
                timeout: self.timeout,
            }
        } else {
            RemoteError::Http(error)
        }
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingClient {
    #[instrument(skip_all, fields(locator = %locator, kind = %kind))]
    async fn embed(&self, locator: &Locator, kind: MediaKind) -> Result<Vec<Embedding>, RemoteError> {
        let body = self.request_body(locator, kind)?;

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(token) = self.credentials.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_http_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let text = response.text().await.map_err(|e| self.map_http_error(e))?;
        let embeddings = parse_response(&text, kind)?;
        debug!(vectors = embeddings.len(), "Embedding response parsed");
        Ok(embeddings)
    }
}

/// Extract the vectors for `kind` from a `predict` response body
pub fn parse_response(body: &str, kind: MediaKind) -> Result<Vec<Embedding>, RemoteError> {
    let response: PredictResponse = serde_json::from_str(body)
        .map_err(|e| RemoteError::malformed(format!("invalid predict response: {}", e)))?;

    let prediction = response
        .predictions
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::malformed("response has no predictions"))?;

    match kind {
        MediaKind::Image => {
            let vector = prediction
                .image_embedding
                .ok_or_else(|| RemoteError::malformed("prediction has no imageEmbedding"))?;
            if vector.is_empty() {
                return Err(RemoteError::malformed("imageEmbedding is empty"));
            }
            Ok(vec![Embedding {
                vector,
                segment: None,
            }])
        },
        MediaKind::Video => {
            let segments = prediction
                .video_embeddings
                .ok_or_else(|| RemoteError::malformed("prediction has no videoEmbeddings"))?;
            if segments.is_empty() {
                return Err(RemoteError::malformed("videoEmbeddings is empty"));
            }
            segments
                .into_iter()
                .map(|s| {
                    if s.end_offset_sec < s.start_offset_sec {
                        return Err(RemoteError::malformed(format!(
                            "segment ends before it starts ({} > {})",
                            s.start_offset_sec, s.end_offset_sec
                        )));
                    }
                    Ok(Embedding {
                        vector: s.embedding,
                        segment: Some(Segment::new(s.start_offset_sec, s.end_offset_sec)),
                    })
                })
                .collect()
        },
    }
}
