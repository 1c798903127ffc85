//! Network dispatch.
//!
//! The `Dispatcher` trait is the seam between the coordinator's retry
//! logic and the actual transport, so tests can fail deliveries without a
//! network.

use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use std::time::Duration;

/// One outgoing delivery attempt.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub endpoint: String,
    pub body: Vec<u8>,
    /// Total attempts made for this payload so far, this one included.
    pub attempt_count: u32,
    pub timeout: Duration,
    pub api_key: String,
    pub device_id: String,
}

/// Transport used by the coordinator for a single delivery attempt.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, request: UploadRequest) -> UploadResult<()>;
}

/// Production transport over HTTP POST.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, request: UploadRequest) -> UploadResult<()> {
        let mut builder = self
            .client
            .post(&request.endpoint)
            .timeout(request.timeout)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-BCN-AID", &request.api_key)
            .header("X-BCN-DID", &request.device_id)
            .body(request.body);

        // the collector tracks re-sends; the first attempt carries no header
        if request.attempt_count > 1 {
            builder = builder.header("x-bcn-retry-count", (request.attempt_count - 1).to_string());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_to(endpoint: String, attempt_count: u32) -> UploadRequest {
        UploadRequest {
            endpoint,
            body: b"{}".to_vec(),
            attempt_count,
            timeout: Duration::from_secs(5),
            api_key: "key-123".into(),
            device_id: "device-456".into(),
        }
    }

    #[tokio::test]
    async fn sends_identity_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/logs"))
            .and(header("X-BCN-AID", "key-123"))
            .and(header("X-BCN-DID", "device-456"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new();
        dispatcher
            .send(request_to(format!("{}/v1/logs", server.uri()), 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn marks_resends_with_retry_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-bcn-retry-count", "2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new();
        dispatcher
            .send(request_to(format!("{}/v1/logs", server.uri()), 3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new();
        let err = dispatcher
            .send(request_to(format!("{}/v1/logs", server.uri()), 1))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Status(503)));
    }
}
