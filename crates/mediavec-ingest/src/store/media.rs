//! Media bytes: origin downloads and object-store uploads

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, instrument};

use mediavec_common::checksum::sha256_hex;
use mediavec_common::types::{BucketScheme, Locator};

use crate::config::StorageConfig;
use crate::error::RemoteError;

/// Where an uploaded object ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub locator: Locator,
    pub size: u64,
    pub checksum: String,
}

/// Fetch media from any locator and write it to the configured bucket
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, RemoteError>;

    async fn put(
        &self,
        data: Bytes,
        name: &str,
        content_type: &str,
    ) -> Result<StoredObject, RemoteError>;
}

/// S3-compatible bucket plus an HTTP client for origin URLs
#[derive(Clone)]
pub struct S3MediaStore {
    client: Client,
    http: reqwest::Client,
    bucket: String,
    key_prefix: String,
    fetch_timeout: Duration,
}

impl S3MediaStore {
    pub fn new(config: &StorageConfig, fetch_timeout: Duration) -> Result<Self, RemoteError> {
        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "mediavec");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());
        Self::with_client(client, config, fetch_timeout)
    }

    /// Build from the ambient AWS configuration (profile, IMDS, env)
    pub async fn from_env(config: &StorageConfig, fetch_timeout: Duration) -> Result<Self, RemoteError> {
        if config.access_key.is_some() || config.endpoint.is_some() {
            return Self::new(config, fetch_timeout);
        }

        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style)
            .build();
        Self::with_client(Client::from_conf(s3_config), config, fetch_timeout)
    }

    fn with_client(
        client: Client,
        config: &StorageConfig,
        fetch_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(RemoteError::Http)?;

        info!(bucket = %config.bucket, "Media store initialized");

        Ok(Self {
            client,
            http,
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
            fetch_timeout,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    async fn fetch_http(&self, url: &str) -> Result<Bytes, RemoteError> {
        let response = self.http.get(url).send().await.map_err(|e| self.http_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.bytes().await.map_err(|e| self.http_error(url, e))
    }

    async fn fetch_s3(&self, bucket: &str, key: &str) -> Result<Bytes, RemoteError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                RemoteError::storage(format!("get s3://{}/{}: {}", bucket, key, e.into_service_error()))
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::storage(format!("read s3://{}/{}: {}", bucket, key, e)))?;

        Ok(data.into_bytes())
    }

    fn http_error(&self, url: &str, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout {
                url: url.to_string(),
                timeout: self.fetch_timeout,
            }
        } else {
            RemoteError::Http(error)
        }
    }
}

#[async_trait]
impl ObjectStore for S3MediaStore {
    #[instrument(skip_all, fields(locator = %locator))]
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, RemoteError> {
        let data = match locator {
            Locator::Http(url) => self.fetch_http(url.as_str()).await?,
            Locator::Bucket {
                scheme: BucketScheme::S3,
                bucket,
                key,
            } => self.fetch_s3(bucket, key).await?,
            // Public GCS objects are reachable over https
            Locator::Bucket {
                scheme: BucketScheme::Gcs,
                ..
            } => self.fetch_http(&locator.public_url()).await?,
        };

        debug!(bytes = data.len(), "Fetched media");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(
        &self,
        data: Bytes,
        name: &str,
        content_type: &str,
    ) -> Result<StoredObject, RemoteError> {
        let key = self.object_key(name);
        let checksum = sha256_hex(&data);
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                RemoteError::storage(format!(
                    "put s3://{}/{}: {}",
                    self.bucket,
                    key,
                    e.into_service_error()
                ))
            })?;

        debug!(bucket = %self.bucket, key = %key, "Uploaded media");

        Ok(StoredObject {
            locator: Locator::s3(&self.bucket, key),
            size,
            checksum,
        })
    }
}
