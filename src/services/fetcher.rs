//! Source image retrieval
//!
//! The orchestrator only depends on [`SourceFetcher`]; [`HttpSourceFetcher`]
//! is the production implementation on top of `reqwest`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::FetchConfig;
use crate::errors::{AppError, AppResult, FetchError, FetchResult};
use crate::utils::UrlUtils;

/// Retrieves raw source bytes for a URL
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the complete body of `url`
    ///
    /// Non-success statuses, timeouts, oversized and empty bodies are errors.
    async fn fetch(&self, url: &str) -> FetchResult<Bytes>;
}

/// `reqwest` backed fetcher with a bounded timeout and body size
#[derive(Clone)]
pub struct HttpSourceFetcher {
    client: Client,
    max_source_bytes: u64,
}

impl HttpSourceFetcher {
    pub fn new(config: &FetchConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_source_bytes: config.max_source_bytes,
        })
    }

    /// Build a fetcher with explicit limits, mainly for tests
    pub fn with_limits(
        user_agent: &str,
        timeout: Duration,
        max_source_bytes: u64,
    ) -> AppResult<Self> {
        Self::new(&FetchConfig {
            timeout,
            connect_timeout: timeout,
            max_source_bytes,
            user_agent: user_agent.to_string(),
        })
    }

    fn map_error(url: &str, error: reqwest::Error) -> FetchError {
        let safe_url = UrlUtils::obfuscate_credentials(url);
        if error.is_timeout() {
            FetchError::Timeout { url: safe_url }
        } else {
            FetchError::Network {
                url: safe_url,
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<Bytes> {
        let safe_url = UrlUtils::obfuscate_credentials(url);
        debug!("Fetching source image: {}", safe_url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus {
                url: safe_url,
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length()
            && length > self.max_source_bytes
        {
            return Err(FetchError::TooLarge {
                url: safe_url,
                limit: self.max_source_bytes,
            });
        }

        // Content-Length may be absent or wrong, so the cap is enforced while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Self::map_error(url, e))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_source_bytes {
                return Err(FetchError::TooLarge {
                    url: safe_url,
                    limit: self.max_source_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(FetchError::EmptyUpstreamResponse { url: safe_url });
        }

        trace!(url = %safe_url, size = body.len(), "Fetched source image");
        Ok(body.freeze())
    }
}
