//! # Router Module
//!
//! The route table. Routes are compiled at registration and scanned in
//! descending priority order on every request; the first enabled route whose
//! pattern and method both match wins. Priority is the only tie-breaker;
//! pattern specificity never reorders the scan.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::parse_query;
use crate::routing::matcher::PathPattern;
use http::Method;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Authentication requirement declared by a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    /// No credential required
    None,
    /// `X-API-Key` header
    ApiKey,
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: Basic base64(name:key)`
    Basic,
}

/// Rate limit declared by a route
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests per window
    pub limit: u32,
    /// Window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// A registered route
///
/// The pattern is compiled once at construction; a `Route` that exists is a
/// route whose pattern is valid.
#[derive(Debug, Clone)]
pub struct Route {
    /// Stable identifier, also part of limiter and cache keys
    pub id: String,

    /// Compiled path pattern
    pub pattern: PathPattern,

    /// Allowed HTTP methods; empty means all methods
    pub methods: Vec<Method>,

    /// Name of the upstream this route forwards to
    pub upstream: String,

    /// Authentication requirement
    pub auth: AuthRequirement,

    /// Rate limit, if any
    pub rate_limit: Option<RateLimitPolicy>,

    /// Cache TTL for successful GET responses; `None` disables caching
    pub cache_ttl: Option<Duration>,

    /// Whether the upstream's circuit breaker guards this route
    pub circuit_breaker: bool,

    /// Scan priority; higher values are tried first
    pub priority: i32,

    /// Disabled routes are skipped during matching
    pub enabled: bool,

    /// Prefix stripped from the matched path before forwarding
    pub strip_prefix: Option<String>,

    /// Prefix prepended to the forwarded path after stripping
    pub add_prefix: Option<String>,
}

impl Route {
    /// Create a route, compiling and validating the pattern
    pub fn new(
        id: impl Into<String>,
        pattern: &str,
        methods: Vec<Method>,
        upstream: impl Into<String>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            id: id.into(),
            pattern: PathPattern::compile(pattern)?,
            methods,
            upstream: upstream.into(),
            auth: AuthRequirement::None,
            rate_limit: None,
            cache_ttl: None,
            circuit_breaker: true,
            priority: 0,
            enabled: true,
            strip_prefix: None,
            add_prefix: None,
        })
    }

    /// Set the authentication requirement
    pub fn with_auth(mut self, auth: AuthRequirement) -> Self {
        self.auth = auth;
        self
    }

    /// Set a rate limit of `limit` requests per `window`
    pub fn with_rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitPolicy { limit, window });
        self
    }

    /// Enable response caching with the given TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }

    /// Enable or disable circuit breaking for this route
    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker = enabled;
        self
    }

    /// Set the scan priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set prefix transforms applied to the forwarded path after matching
    pub fn with_prefix_transform(
        mut self,
        strip: Option<String>,
        add: Option<String>,
    ) -> Self {
        self.strip_prefix = strip;
        self.add_prefix = add;
        self
    }

    /// Mark the route disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check if this route allows the given method
    pub fn matches_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Path sent upstream: matched path with prefix transforms applied
    pub fn forward_path(&self, path: &str) -> String {
        let stripped = match &self.strip_prefix {
            Some(prefix) => path.strip_prefix(prefix.as_str()).unwrap_or(path),
            None => path,
        };
        let mut forwarded = match &self.add_prefix {
            Some(prefix) => format!("{prefix}{stripped}"),
            None => stripped.to_string(),
        };
        if forwarded.is_empty() {
            forwarded.push('/');
        }
        forwarded
    }
}

/// Result of a successful route lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The winning route
    pub route: Arc<Route>,

    /// Parameters bound by `{name}` pattern segments
    pub params: HashMap<String, String>,

    /// Decoded query parameters
    pub query_params: HashMap<String, String>,
}

/// Priority-ordered route table
///
/// Internally a vector sorted by descending priority, stable within equal
/// priorities (registration order). Lookups take a read lock and scan;
/// registration takes the write lock.
#[derive(Default)]
pub struct Router {
    routes: RwLock<Vec<Arc<Route>>>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Register a route
    ///
    /// Fails synchronously on a duplicate route id. The pattern was already
    /// validated when the `Route` was built.
    pub fn add_route(&self, route: Route) -> GatewayResult<()> {
        let mut routes = self.routes.write();
        if routes.iter().any(|existing| existing.id == route.id) {
            return Err(GatewayError::config(format!(
                "duplicate route id: {}",
                route.id
            )));
        }
        let position = routes
            .iter()
            .position(|existing| existing.priority < route.priority)
            .unwrap_or(routes.len());
        routes.insert(position, Arc::new(route));
        Ok(())
    }

    /// Remove a route by id
    pub fn remove_route(&self, id: &str) -> Option<Arc<Route>> {
        let mut routes = self.routes.write();
        let position = routes.iter().position(|route| route.id == id)?;
        Some(routes.remove(position))
    }

    /// Match a request path and method against the table
    ///
    /// Scans enabled routes in descending priority; a method mismatch does
    /// not stop the scan, so a lower-priority route with the right method
    /// can still win.
    pub fn match_route(&self, method: &Method, path: &str, query: Option<&str>) -> Option<RouteMatch> {
        let routes = self.routes.read();
        for route in routes.iter() {
            if !route.enabled || !route.matches_method(method) {
                continue;
            }
            if let Some(params) = route.pattern.matches(path) {
                debug!(
                    route_id = %route.id,
                    pattern = %route.pattern.as_str(),
                    %path,
                    "route matched"
                );
                let query_params = query.map(parse_query).unwrap_or_default();
                return Some(RouteMatch {
                    route: route.clone(),
                    params,
                    query_params,
                });
            }
        }
        None
    }

    /// Snapshot of all registered routes, in scan order
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.read().clone()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}
