//! # Configuration Module
//!
//! Declarative configuration for a whole gateway: defaults plus route,
//! upstream and consumer definitions, loadable from YAML. Definitions are
//! validated as they are converted into runtime objects, so a config error
//! is reported at load time, never mid-request.

use crate::core::circuit_breaker::BreakerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Consumer;
use crate::load_balancing::LoadBalancingAlgorithm;
use crate::rate_limit::RateLimitAlgorithm;
use crate::routing::{AuthRequirement, RateLimitPolicy, Route};
use crate::upstream::{Target, Upstream, UpstreamTimeouts};
use http::Method;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Admission algorithm for the gateway's rate limiter
    pub rate_limit_algorithm: RateLimitAlgorithm,

    /// Response cache settings
    pub cache: CacheSettings,

    /// Breaker settings applied to upstreams that do not override them
    pub default_breaker: BreakerConfig,

    /// Timeout budget applied to upstreams that do not override it
    pub default_timeouts: UpstreamTimeouts,

    /// Upstream definitions
    pub upstreams: Vec<UpstreamDef>,

    /// Route definitions
    pub routes: Vec<RouteDef>,

    /// Consumer definitions
    pub consumers: Vec<ConsumerDef>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_algorithm: RateLimitAlgorithm::TokenBucket,
            cache: CacheSettings::default(),
            default_breaker: BreakerConfig::default(),
            default_timeouts: UpstreamTimeouts::default(),
            upstreams: Vec::new(),
            routes: Vec::new(),
            consumers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration from YAML text
    pub fn from_yaml(yaml: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|err| GatewayError::config(format!("invalid gateway config: {err}")))
    }

    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            GatewayError::config(format!(
                "cannot read config file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&contents)
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of cached responses
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Declarative route definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDef {
    pub id: String,
    pub pattern: String,
    /// Allowed methods as strings; empty means all
    #[serde(default)]
    pub methods: Vec<String>,
    pub upstream: String,
    #[serde(default = "default_auth")]
    pub auth: AuthRequirement,
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,
    /// Cache TTL for successful GET responses; omit or zero to disable
    #[serde(default, with = "humantime_serde::option")]
    pub cache_ttl: Option<Duration>,
    #[serde(default = "default_true")]
    pub circuit_breaker: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strip_prefix: Option<String>,
    #[serde(default)]
    pub add_prefix: Option<String>,
}

fn default_auth() -> AuthRequirement {
    AuthRequirement::None
}

/// Parse a method name, case-insensitively, rejecting extension methods
fn parse_standard_method(route_id: &str, name: &str) -> GatewayResult<Method> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "GET" | "POST" | "PUT" | "DELETE" | "PATCH" | "HEAD" | "OPTIONS" | "TRACE"
        | "CONNECT" => Method::from_str(&upper).map_err(|_| {
            GatewayError::config(format!("route {route_id}: invalid HTTP method {name}"))
        }),
        _ => Err(GatewayError::config(format!(
            "route {route_id}: unsupported HTTP method {name}"
        ))),
    }
}

fn default_true() -> bool {
    true
}

impl RouteDef {
    /// Build the runtime route, compiling the pattern and parsing methods
    ///
    /// Only the standard HTTP methods are accepted; `Method::from_str` alone
    /// would admit any RFC token as an extension method.
    pub fn build(&self) -> GatewayResult<Route> {
        let methods = self
            .methods
            .iter()
            .map(|name| parse_standard_method(&self.id, name))
            .collect::<GatewayResult<Vec<Method>>>()?;

        let mut route = Route::new(&self.id, &self.pattern, methods, &self.upstream)?
            .with_auth(self.auth)
            .with_circuit_breaker(self.circuit_breaker)
            .with_priority(self.priority)
            .with_prefix_transform(self.strip_prefix.clone(), self.add_prefix.clone());
        if let Some(policy) = self.rate_limit {
            route = route.with_rate_limit(policy.limit, policy.window);
        }
        if let Some(ttl) = self.cache_ttl {
            route = route.with_cache_ttl(ttl);
        }
        if !self.enabled {
            route = route.disabled();
        }
        Ok(route)
    }
}

/// Declarative target definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDef {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub healthy: bool,
}

fn default_weight() -> u32 {
    1
}

/// Declarative upstream definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamDef {
    pub name: String,
    pub targets: Vec<TargetDef>,
    #[serde(default = "default_algorithm")]
    pub algorithm: LoadBalancingAlgorithm,
    #[serde(default)]
    pub timeouts: Option<UpstreamTimeouts>,
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,
}

fn default_algorithm() -> LoadBalancingAlgorithm {
    LoadBalancingAlgorithm::RoundRobin
}

impl UpstreamDef {
    /// Build the runtime upstream, applying gateway defaults where unset
    pub fn build(
        &self,
        default_timeouts: UpstreamTimeouts,
        default_breaker: BreakerConfig,
    ) -> GatewayResult<Upstream> {
        let targets: Vec<Target> = self
            .targets
            .iter()
            .map(|def| {
                let target = Target::new(def.host.clone(), def.port, def.weight);
                target.set_healthy(def.healthy);
                target
            })
            .collect();

        let upstream = Upstream::new(&self.name, targets, self.algorithm)?
            .with_timeouts(self.timeouts.unwrap_or(default_timeouts))
            .with_breaker(self.breaker.clone().unwrap_or(default_breaker));
        Ok(upstream)
    }
}

/// Declarative consumer definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerDef {
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub allowed_routes: Vec<String>,
}

impl ConsumerDef {
    /// Build the runtime consumer
    pub fn build(&self) -> Consumer {
        let mut consumer = Consumer::new(&self.name, &self.api_key);
        consumer.rate_limit = self.rate_limit;
        consumer.allowed_routes = self.allowed_routes.clone();
        consumer
    }
}
