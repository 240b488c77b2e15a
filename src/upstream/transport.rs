//! # Upstream Transport
//!
//! The seam between the decision pipeline and whatever actually carries
//! bytes to a backend. The pipeline is transport-agnostic: it hands a
//! selected target and a prepared request to a [`Transport`] and interprets
//! the outcome. Tests inject scripted transports; production wires in
//! [`HttpTransport`] or its own implementation.

use crate::core::types::GatewayResponse;
use crate::upstream::{Target, UpstreamTimeouts};
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Request shape handed to a transport
///
/// The path has already had the route's prefix transforms applied.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Arc<Vec<u8>>,
}

/// Failures a transport can report
///
/// Deliberately narrow: the pipeline maps these onto its own error taxonomy
/// and attaches the upstream name itself.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The call did not complete within the timeout budget
    #[error("upstream call timed out")]
    Timeout,

    /// The call failed below the HTTP layer (connect refused, reset, ...)
    #[error("upstream call failed: {0}")]
    Failed(String),
}

/// Carries a prepared request to a concrete target
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Forward the request to the target within the given timeout budget
    async fn forward(
        &self,
        target: &Target,
        request: &UpstreamRequest,
        timeouts: UpstreamTimeouts,
    ) -> Result<GatewayResponse, TransportError>;
}

/// Default HTTP transport over a shared `reqwest` client
///
/// `reqwest` scopes connect timeouts to the client, not to a request, so the
/// per-request deadline passed to [`Transport::forward`] is the combined
/// connect-plus-read budget ([`UpstreamTimeouts::total`]). To also bound the
/// connect phase on its own, build the transport with
/// [`HttpTransport::with_connect_timeout`].
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport whose client bounds the connect phase separately
    pub fn with_connect_timeout(connect: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn forward(
        &self,
        target: &Target,
        request: &UpstreamRequest,
        timeouts: UpstreamTimeouts,
    ) -> Result<GatewayResponse, TransportError> {
        let mut url = format!("http://{}{}", target.address(), request.path);
        if let Some(query) = &request.query {
            url.push('?');
            url.push_str(query);
        }

        // reqwest carries its own http-version types; bridge by value.
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(timeouts.total())
            .body(request.body.as_ref().clone());
        for (name, value) in request.headers.iter() {
            if let Ok(value) = value.to_str() {
                builder = builder.header(name.as_str(), value);
            }
        }

        debug!(%url, "forwarding request upstream");
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Failed(err.to_string())
            }
        })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers().iter() {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                http::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Failed(err.to_string()))?;

        Ok(GatewayResponse::new(status, headers, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connect_timeout_transport_constructs() {
        let _default = HttpTransport::new();
        let _bounded = HttpTransport::with_connect_timeout(Duration::from_secs(2));
    }
}
