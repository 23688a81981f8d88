//! Transport seam: one POST per call, no retries, no interpretation
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Raw result of one round-trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// `None` when the body was empty
    pub body: Option<String>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The round-trip itself could not complete.
///
/// Attempt timeouts are imposed by the protocol caller, not the transport.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Request/response carrier for serialized JSON-RPC bodies
#[async_trait]
pub trait RpcTransport: Send + Sync + fmt::Debug {
    /// Human-readable endpoint, for logs and errors
    fn endpoint(&self) -> &str;

    async fn post(&self, body: String) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::new(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: String) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::new(format!("failed to read response body: {e}")))?;
        trace!(status, bytes = text.len(), "HTTP round-trip complete");

        Ok(TransportResponse {
            status,
            body: if text.trim().is_empty() { None } else { Some(text) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_transport_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"eth_chainId"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url()).unwrap();
        let response = transport
            .post(r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#.to_string())
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(
            response.body.as_deref(),
            Some(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_transport_reports_status_and_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url()).unwrap();
        let response = transport.post("{}".to_string()).await.unwrap();

        assert_eq!(response.status, 503);
        assert!(!response.is_success());
        assert_eq!(response.body, None);
    }

    #[tokio::test]
    async fn test_http_transport_connection_failure() {
        // Nothing listens on port 9 (discard) in the test environment.
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        assert!(transport.post("{}".to_string()).await.is_err());
    }
}
