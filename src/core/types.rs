//! # Core Types Module
//!
//! Foundational value objects used throughout the gateway: the unified
//! request and response types, the authentication context produced by the
//! auth stage, and the administratively-owned `Consumer` record.
//!
//! Requests and responses are created per inbound call and discarded when
//! the call completes; they are never shared across requests. Bodies are
//! held behind `Arc` so cloning a request does not copy large payloads.

use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// An inbound request before any pipeline processing
///
/// This is the transport-neutral request shape the pipeline operates on.
/// Whatever actually parsed the bytes off the wire builds one of these.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Unique identifier for this request (for tracing and logging)
    pub id: String,

    /// HTTP method (GET, POST, ...)
    pub method: Method,

    /// Request URI including path and query string
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Request body as opaque bytes
    pub body: Arc<Vec<u8>>,

    /// Client's IP address, used as the limiter key for anonymous traffic
    pub client_ip: IpAddr,

    /// Timestamp when the request was received
    pub received_at: Instant,
}

impl IncomingRequest {
    /// Create a new incoming request with a generated ID
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Vec<u8>,
        client_ip: IpAddr,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            uri,
            headers,
            body: Arc::new(body),
            client_ip,
            received_at: Instant::now(),
        }
    }

    /// Convenience constructor for a bodyless GET request
    pub fn get(uri: Uri, client_ip: IpAddr) -> Self {
        Self::new(Method::GET, uri, HeaderMap::new(), Vec::new(), client_ip)
    }

    /// Get the request path without the query string
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get the raw query string, if any
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get a header value by name, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Response produced by the gateway
///
/// Carries either the forwarded upstream response or a gateway-generated
/// error body, plus the diagnostic fields the pipeline fills in.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// Response headers, including gateway-injected ones
    pub headers: HeaderMap,

    /// Response body
    pub body: Arc<Vec<u8>>,

    /// Time spent handling the request inside the gateway
    pub latency: Duration,

    /// `host:port` of the upstream target that served the request, if any
    pub upstream_target: Option<String>,
}

impl GatewayResponse {
    /// Create a new response
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body: Arc::new(body),
            latency: Duration::ZERO,
            upstream_target: None,
        }
    }

    /// Create a plain-text response
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = "text/plain".parse() {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        Self::new(status, headers, text.into().into_bytes())
    }

    /// Create a JSON response from any serializable value
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Result<Self, serde_json::Error> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = "application/json".parse() {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        let body = serde_json::to_vec(data)?;
        Ok(Self::new(status, headers, body))
    }

    /// Create a structured error response body
    pub fn error(status: StatusCode, error_type: &str, message: &str) -> Self {
        let error_body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "type": error_type,
                "message": message,
            }
        });
        Self::json(status, &error_body)
            .unwrap_or_else(|_| Self::text(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Authentication context attached to a request after the auth stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Identifier of the authenticated consumer
    pub consumer_id: String,

    /// Display name of the consumer
    pub consumer_name: String,

    /// Which scheme authenticated the request ("api_key", "bearer", "basic")
    pub auth_method: String,

    /// Per-consumer rate limit override, if the consumer carries one
    pub rate_limit: Option<u32>,
}

/// An API consumer registered with the gateway
///
/// Owned by the gateway and mutated only through administration, except for
/// `last_used` which the auth stage touches on every successful credential
/// check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    /// Unique consumer identifier
    pub id: String,

    /// Human-readable name, also the username for basic auth
    pub name: String,

    /// API key; unique across all consumers
    pub api_key: String,

    /// Per-consumer rate limit (requests per route window); overrides the
    /// route limit for this consumer when set
    pub rate_limit: Option<u32>,

    /// Route ids this consumer may call; empty means all routes
    pub allowed_routes: Vec<String>,

    /// Last successful authentication, maintained by the registry
    pub last_used: Option<chrono::DateTime<chrono::Utc>>,
}

impl Consumer {
    /// Create a new consumer with a generated id
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            api_key: api_key.into(),
            rate_limit: None,
            allowed_routes: Vec::new(),
            last_used: None,
        }
    }

    /// Set a per-consumer rate limit
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Restrict the consumer to a set of route ids
    pub fn with_allowed_routes(mut self, routes: Vec<String>) -> Self {
        self.allowed_routes = routes;
        self
    }

    /// Whether this consumer may call the given route
    pub fn may_use_route(&self, route_id: &str) -> bool {
        self.allowed_routes.is_empty() || self.allowed_routes.iter().any(|r| r == route_id)
    }
}

/// Parse a raw query string into decoded key/value pairs
///
/// Keys without a value (e.g. `?flag`) map to the empty string. Pairs that
/// fail to percent-decode are skipped.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        if let Some((key, value)) = pair.split_once('=') {
            if let (Ok(decoded_key), Ok(decoded_value)) =
                (urlencoding::decode(key), urlencoding::decode(value))
            {
                params.insert(decoded_key.into_owned(), decoded_value.into_owned());
            }
        } else if let Ok(decoded_key) = urlencoding::decode(pair) {
            params.insert(decoded_key.into_owned(), String::new());
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_incoming_request_accessors() {
        let request = IncomingRequest::new(
            Method::GET,
            "/api/users?limit=10".parse().unwrap(),
            HeaderMap::new(),
            b"body".to_vec(),
            local_ip(),
        );

        assert_eq!(request.path(), "/api/users");
        assert_eq!(request.query(), Some("limit=10"));
        assert!(!request.id.is_empty());
    }

    #[test]
    fn test_query_parsing_decodes_and_handles_flags() {
        let params = parse_query("q=hello%20world&flag&category=rust%26go");
        assert_eq!(params.get("q"), Some(&"hello world".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
        assert_eq!(params.get("category"), Some(&"rust&go".to_string()));
    }

    #[test]
    fn test_gateway_response_helpers() {
        let response = GatewayResponse::text(StatusCode::OK, "pong");
        assert!(response.is_success());
        assert_eq!(response.body.as_ref(), b"pong");

        let error = GatewayResponse::error(StatusCode::NOT_FOUND, "no_route_match", "no route");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        let parsed: serde_json::Value = serde_json::from_slice(&error.body).unwrap();
        assert_eq!(parsed["error"]["code"], 404);
        assert_eq!(parsed["error"]["type"], "no_route_match");
    }

    #[test]
    fn test_consumer_allow_list() {
        let open = Consumer::new("alice", "key-a");
        assert!(open.may_use_route("anything"));

        let restricted =
            Consumer::new("bob", "key-b").with_allowed_routes(vec!["users".to_string()]);
        assert!(restricted.may_use_route("users"));
        assert!(!restricted.may_use_route("orders"));
    }
}
