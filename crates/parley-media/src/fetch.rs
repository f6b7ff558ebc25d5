// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded download of provider-hosted media.

use std::time::Duration;

use parley_config::model::MediaConfig;
use parley_core::ParleyError;
use tracing::debug;

/// A downloaded media body.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// `Content-Type` the body was served with, if any.
    pub content_type: Option<String>,
}

/// Downloads media with a per-request timeout and a size ceiling.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Media {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    pub fn from_config(config: &MediaConfig) -> Result<Self, ParleyError> {
        Self::new(config.fetch_timeout(), config.max_bytes)
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> ParleyError {
        if e.is_timeout() {
            return ParleyError::Timeout {
                duration: self.timeout,
            };
        }
        ParleyError::Media {
            message: format!("download of {url} failed: {e}"),
            source: Some(Box::new(e)),
        }
    }

    fn too_large(&self, url: &str) -> ParleyError {
        ParleyError::Media {
            message: format!("media at {url} exceeds {} bytes", self.max_bytes),
            source: None,
        }
    }

    /// GETs `url`, refusing bodies larger than the configured ceiling.
    pub async fn fetch(&self, url: &str) -> Result<Fetched, ParleyError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::Media {
                message: format!("download of {url} returned HTTP {status}"),
                source: None,
            });
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes)
        {
            return Err(self.too_large(url));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.request_error(url, e))?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(url));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(url, size = bytes.len(), "media downloaded");
        Ok(Fetched {
            bytes,
            content_type,
        })
    }
}
