//! # Core Module
//!
//! Shared building blocks: request/response types, the error taxonomy,
//! circuit breaking and declarative configuration.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod types;

pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerRegistry};
pub use config::{CacheSettings, ConsumerDef, GatewayConfig, RouteDef, TargetDef, UpstreamDef};
pub use error::{GatewayError, GatewayResult};
pub use types::{AuthContext, Consumer, GatewayResponse, IncomingRequest};
