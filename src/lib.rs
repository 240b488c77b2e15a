//! # Portway
//!
//! An embeddable API gateway core: route matching, authentication, rate
//! limiting, circuit breaking, load balancing and response caching behind a
//! single request pipeline. Portway is a library, not a server; callers feed
//! it [`IncomingRequest`]s and forward the returned [`GatewayResponse`]s
//! however they like.
//!
//! ## Example
//!
//! ```no_run
//! use portway::{Gateway, GatewayConfig};
//!
//! # fn main() -> portway::GatewayResult<()> {
//! let config = GatewayConfig::from_yaml_file("gateway.yaml")?;
//! let gateway = Gateway::from_config_http(&config)?;
//! // gateway.handle(request).await drives the whole pipeline
//! # Ok(())
//! # }
//! ```

/// Error taxonomy, request/response types, circuit breaking and
/// declarative configuration
pub mod core;

/// Consumer registry and per-route authentication
pub mod auth;

/// Response caching with TTL expiry and bounded capacity
pub mod caching;

/// The request pipeline tying every stage together
pub mod gateway;

/// Target selection strategies for upstream pools
pub mod load_balancing;

/// Admission control: fixed window, sliding window and token bucket
pub mod rate_limit;

/// Path patterns and the priority-ordered routing table
pub mod routing;

/// Upstream pools, targets and the forwarding transport
pub mod upstream;

pub use crate::auth::{AuthManager, ConsumerRegistry};
pub use crate::caching::{cache_key, CacheStats, ResponseCache};
pub use crate::core::circuit_breaker::{
    BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerRegistry,
};
pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::core::types::{AuthContext, Consumer, GatewayResponse, IncomingRequest};
pub use crate::gateway::Gateway;
pub use crate::load_balancing::{LoadBalancingAlgorithm, TargetSelector};
pub use crate::rate_limit::{RateLimitAlgorithm, RateLimiter};
pub use crate::routing::{AuthRequirement, PathPattern, Route, RouteMatch, Router};
pub use crate::upstream::transport::{HttpTransport, Transport, TransportError, UpstreamRequest};
pub use crate::upstream::{Target, Upstream, UpstreamRegistry, UpstreamTimeouts};
