//! # Error Handling Module
//!
//! Defines every terminal failure the request pipeline can produce, together
//! with its HTTP status mapping. Each pipeline stage short-circuits with one
//! of these variants; the gateway turns the variant into the client response.
//!
//! Administrative errors (`Configuration`) are raised synchronously at
//! registration time and never surface mid-request.

use http::StatusCode;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Terminal failures of the request pipeline plus registration-time errors
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display`
/// with the given message for each variant.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Registration-time errors (malformed pattern, duplicate consumer key, ...)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No enabled route matched the request path and method
    #[error("No route matched {method} {path}")]
    NoRouteMatch { method: String, path: String },

    /// Missing or invalid credential for a route requiring authentication
    #[error("Authentication failed: {reason}")]
    Unauthorized { reason: String },

    /// Authenticated consumer is not allowed to use this route
    #[error("Access denied: {reason}")]
    Forbidden { reason: String },

    /// Limiter rejected the request; retry after the given number of seconds
    #[error("Rate limit exceeded for {key}")]
    RateLimitExceeded { key: String, retry_after_secs: u64 },

    /// Circuit breaker is not admitting requests to the upstream
    #[error("Circuit breaker open for upstream: {upstream}")]
    CircuitOpen { upstream: String },

    /// Upstream exists but its healthy target set is empty
    #[error("No healthy target for upstream: {upstream}")]
    NoHealthyTarget { upstream: String },

    /// Route references an upstream that was never registered
    #[error("Unknown upstream: {upstream}")]
    UnknownUpstream { upstream: String },

    /// The forwarded call failed at the transport level
    #[error("Upstream call failed for {upstream}: {reason}")]
    UpstreamFailure { upstream: String, reason: String },

    /// The forwarded call exceeded the upstream's timeout budget
    #[error("Upstream {upstream} timed out after {timeout_ms}ms")]
    Timeout { upstream: String, timeout_ms: u64 },

    /// The caller cancelled the request while the forward was in flight
    #[error("Request cancelled by client")]
    Cancelled,
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn unauthorized<S: Into<String>>(reason: S) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create an authorization error with a custom reason
    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create an upstream failure with a custom reason
    pub fn upstream_failure<S: Into<String>>(upstream: S, reason: S) -> Self {
        Self::UpstreamFailure {
            upstream: upstream.into(),
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code the client should see for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRouteMatch { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoHealthyTarget { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnknownUpstream { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            // Non-standard "client closed request"; widely used by proxies.
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    /// String label for the error category, used in response bodies and logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::NoRouteMatch { .. } => "no_route_match",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::NoHealthyTarget { .. } => "no_healthy_target",
            Self::UnknownUpstream { .. } => "unknown_upstream",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::Timeout { .. } => "upstream_timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this error is evidence of upstream ill health
    ///
    /// Only these variants are recorded as failures against the upstream's
    /// circuit breaker. A cancelled forward records nothing at all.
    pub fn counts_as_upstream_failure(&self) -> bool {
        matches!(self, Self::UpstreamFailure { .. } | Self::Timeout { .. })
    }
}
