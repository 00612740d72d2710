//! Bearer tokens for the embedding service

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::RemoteError;

/// Access tokens from `gcloud auth print-access-token` live for an hour
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

#[async_trait]
pub trait CredentialSupplier: Send + Sync + 'static {
    /// Token for the `Authorization: Bearer` header, or `None` to send no header
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError>;
}

/// No authentication (local or proxied endpoints)
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialSupplier for Anonymous {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError> {
        Ok(None)
    }
}

/// A fixed, pre-issued token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialSupplier for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError> {
        Ok(Some(self.0.clone()))
    }
}

/// Runs a shell command that prints a token, caching the result for `ttl`
pub struct CommandToken {
    command: String,
    ttl: Duration,
    cached: Mutex<Option<(String, Instant)>>,
}

impl CommandToken {
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_ttl(command, DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(command: impl Into<String>, ttl: Duration) -> Self {
        Self {
            command: command.into(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    async fn run_command(&self) -> Result<String, RemoteError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
            .map_err(|e| RemoteError::Credential(format!("failed to run '{}': {}", self.command, e)))?;

        if !output.status.success() {
            return Err(RemoteError::Credential(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(RemoteError::Credential(format!(
                "'{}' printed an empty token",
                self.command
            )));
        }
        Ok(token)
    }
}

#[async_trait]
impl CredentialSupplier for CommandToken {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError> {
        // Held across the command so concurrent records refresh the token once
        let mut cached = self.cached.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(Some(token.clone()));
            }
        }

        let token = self.run_command().await?;
        debug!(command = %self.command, "Refreshed embedding access token");
        *cached = Some((token.clone(), Instant::now()));
        Ok(Some(token))
    }
}

/// Pick the supplier the configuration asks for
pub fn from_config(config: &EmbeddingConfig) -> Arc<dyn CredentialSupplier> {
    match (&config.token, &config.token_command) {
        (Some(token), _) => Arc::new(StaticToken::new(token.clone())),
        (None, Some(command)) => Arc::new(CommandToken::new(command.clone())),
        (None, None) => Arc::new(Anonymous),
    }
}
