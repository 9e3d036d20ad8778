//! Remote archive download

use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered with a non-success status
    #[error("HTTP {status} {reason} from {url}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },

    /// No usable response: DNS, connect, TLS, timeout, truncated body
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Transport { .. } => None,
        }
    }
}

/// Source of compressed archives addressed by URL
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) GET with a fixed User-Agent
#[derive(Clone)]
pub struct HttpArchiveSource {
    client: Client,
}

impl HttpArchiveSource {
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }

    fn transport(url: &str, err: reqwest::Error) -> FetchError {
        FetchError::Transport {
            url: url.to_string(),
            message: error_chain(&err),
        }
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("Requesting archive");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Archive request rejected");
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::transport(url, e))?;

        info!(bytes = bytes.len(), "Downloaded archive");

        Ok(bytes.to_vec())
    }
}

/// `err` followed by each of its sources, joined with `: `
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
