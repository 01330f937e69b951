//! HTTP client for the configuration service.
//!
//! Speaks the service's three endpoints:
//! - `POST /api/resolve` with `{ key, thinkingEnabled }`
//! - `POST /api/resolve/{variantId}/conversion`
//! - `GET /health`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use tracing::debug;

use super::sanitize::{MAX_ERROR_BODY_BYTES, sanitize_error_body};
use crate::traits::ConfigSource;
use crate::{CacheKey, ResolvedConfig, Result, VerdandiError};

/// Default base URL for a locally running configuration service.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
    key: &'a str,
    thinking_enabled: bool,
}

/// [`ConfigSource`] backed by the configuration service's HTTP API.
///
/// Every request carries the same timeout; a request that exceeds it fails
/// with [`VerdandiError::Timeout`]. Non-2xx responses become
/// [`VerdandiError::Api`] with a sanitized body.
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpConfigSource {
    /// Create a source for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            VerdandiError::Configuration(format!("invalid service URL '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(VerdandiError::Configuration(format!(
                "service URL '{base_url}' cannot carry a path"
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerdandiError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// Create a source with the default timeout (for testing with wiremock).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| VerdandiError::Configuration("service URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn transport_error(&self, e: reqwest::Error) -> VerdandiError {
        if e.is_timeout() {
            VerdandiError::Timeout(self.timeout)
        } else {
            VerdandiError::Http(e.to_string())
        }
    }

    /// Pass 2xx responses through; turn anything else into an API error.
    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = read_error_body(response).await;
        Err(VerdandiError::Api {
            status: status.as_u16(),
            message: sanitize_error_body(&body),
        })
    }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of an error body. The remainder is
/// never buffered; a body that fails mid-read keeps what arrived.
async fn read_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_ERROR_BODY_BYTES - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn resolve(&self, key: &CacheKey) -> Result<ResolvedConfig> {
        let url = self.endpoint(&["api", "resolve"])?;
        debug!(%key, %url, "resolving configuration");

        let response = self
            .http
            .post(url)
            .json(&ResolveRequest {
                key: key.name(),
                thinking_enabled: key.thinking(),
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn record_conversion(&self, variant_id: &str) -> Result<()> {
        if variant_id.is_empty() {
            return Err(VerdandiError::InvalidInput("variant id is empty".into()));
        }
        let url = self.endpoint(&["api", "resolve", variant_id, "conversion"])?;
        debug!(variant_id, "recording conversion");

        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check_status(response).await?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let url = self.endpoint(&["health"])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_segments() {
        let source = HttpConfigSource::with_base_url("http://localhost:9000").unwrap();
        let url = source.endpoint(&["api", "resolve"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/resolve");
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let source = HttpConfigSource::with_base_url("http://localhost:9000/config/").unwrap();
        let url = source.endpoint(&["health"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/config/health");
    }

    #[test]
    fn variant_id_is_encoded() {
        let source = HttpConfigSource::with_base_url("http://localhost:9000").unwrap();
        let url = source
            .endpoint(&["api", "resolve", "a/b c", "conversion"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/api/resolve/a%2Fb%20c/conversion"
        );
    }

    #[test]
    fn invalid_url_rejected() {
        let err = HttpConfigSource::with_base_url("not a url").unwrap_err();
        assert!(matches!(err, VerdandiError::Configuration(_)));
        let err = HttpConfigSource::with_base_url("mailto:ops@example.com").unwrap_err();
        assert!(matches!(err, VerdandiError::Configuration(_)));
    }

    #[test]
    fn request_body_uses_camel_case() {
        let body = serde_json::to_value(ResolveRequest {
            key: "summary",
            thinking_enabled: true,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "key": "summary", "thinkingEnabled": true })
        );
    }
}
