//! Media store access: resolve a content ref to a signed URL, then
//! download it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::KioskError;
use crate::network::HubLink;
use crate::protocol::{MediaResolveRequest, SignedUrl};

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn resolve(&self, content_ref: &str) -> Result<SignedUrl, KioskError>;

    async fn download(&self, url: &SignedUrl) -> Result<Vec<u8>, KioskError>;
}

/// Resolves through the hub, downloads over HTTP(S).
///
/// `file://` URLs are read from the local filesystem, which lets a hub
/// serve media from a directory during bring-up without a CDN.
#[derive(Debug, Clone)]
pub struct HubMediaStore {
    link: HubLink,
    http: reqwest::Client,
    max_bytes: u64,
}

impl HubMediaStore {
    pub fn new(link: HubLink, timeout: Duration, max_bytes: u64) -> Result<Self, KioskError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KioskError::Other(format!("http client: {e}")))?;
        Ok(Self {
            link,
            http,
            max_bytes,
        })
    }

    fn prefetch_error(url: &SignedUrl, reason: impl Into<String>) -> KioskError {
        KioskError::Prefetch {
            content_ref: url.content_ref.clone(),
            reason: reason.into(),
        }
    }

    fn check_size(&self, url: &SignedUrl, len: u64) -> Result<(), KioskError> {
        if len > self.max_bytes {
            return Err(Self::prefetch_error(
                url,
                format!("{len} bytes exceeds limit of {}", self.max_bytes),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaStore for HubMediaStore {
    async fn resolve(&self, content_ref: &str) -> Result<SignedUrl, KioskError> {
        let request = MediaResolveRequest {
            content_ref: content_ref.to_string(),
        };
        self.link.request(&request).await.map_err(|e| KioskError::Prefetch {
            content_ref: content_ref.to_string(),
            reason: format!("resolve: {e}"),
        })
    }

    async fn download(&self, url: &SignedUrl) -> Result<Vec<u8>, KioskError> {
        if let Some(path) = url.url.strip_prefix("file://") {
            let path = path.split('?').next().unwrap_or(path);
            debug!(path, "reading media from local file");
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| Self::prefetch_error(url, e.to_string()))?;
            self.check_size(url, bytes.len() as u64)?;
            return Ok(bytes);
        }

        let response = self
            .http
            .get(&url.url)
            .send()
            .await
            .map_err(|e| Self::prefetch_error(url, e.to_string()))?
            .error_for_status()
            .map_err(|e| Self::prefetch_error(url, e.to_string()))?;

        if let Some(len) = response.content_length() {
            self.check_size(url, len)?;
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::prefetch_error(url, e.to_string()))?;
        self.check_size(url, bytes.len() as u64)?;
        Ok(bytes.to_vec())
    }
}
