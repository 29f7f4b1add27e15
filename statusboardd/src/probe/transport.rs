use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use thiserror::Error;
use shared::protocol::{PROBE_ACCEPT, PROBE_USER_AGENT};

/// Status and, when requested, body of one GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// The network seam the resolver probes through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`. The body is read only when `read_body` is set.
    async fn get(&self, url: &str, read_body: bool) -> Result<FetchResponse, TransportError>;
}

/// Slack on the client's own deadline so the resolver's timeout fires first.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// reqwest-backed transport shared by every probe.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(PROBE_ACCEPT));

        let client = reqwest::Client::builder()
            .timeout(timeout + CLIENT_TIMEOUT_GRACE)
            .user_agent(PROBE_USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, read_body: bool) -> Result<FetchResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = if read_body {
            Some(response.text().await?)
        } else {
            None
        };
        Ok(FetchResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_port_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();
        let result = transport.get("http://127.0.0.1:1/", false).await;
        assert!(result.is_err());
    }
}
