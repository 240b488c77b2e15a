//! # Request Pipeline
//!
//! The [`Gateway`] owns every stage of request handling and runs them in a
//! fixed order: route lookup, authentication, rate limiting, circuit check,
//! cache lookup, target selection, forwarding, circuit recording, cache
//! store. A stage either passes the request along or short-circuits with a
//! [`GatewayError`], which the gateway turns into a structured error
//! response. The pipeline itself never panics on bad input.

use crate::auth::{AuthManager, ConsumerRegistry};
use crate::caching::{cache_key, CacheStats, ResponseCache};
use crate::core::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{AuthContext, Consumer, GatewayResponse, IncomingRequest};
use crate::rate_limit::{limiter_key, RateLimitAlgorithm, RateLimiter};
use crate::routing::{Route, RouteMatch, Router};
use crate::upstream::transport::{HttpTransport, Transport, TransportError, UpstreamRequest};
use crate::upstream::{Target, Upstream, UpstreamRegistry};
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, Method};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_UPSTREAM_TARGET: HeaderName = HeaderName::from_static("x-upstream-target");

/// The gateway: routing table, policy engines and upstream pools behind a
/// single `handle` entry point.
///
/// All components are internally synchronized; `Gateway` is cheap to share
/// behind an `Arc` and `handle` can run from many tasks concurrently.
pub struct Gateway {
    router: Router,
    consumers: Arc<ConsumerRegistry>,
    auth: AuthManager,
    limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    cache: ResponseCache,
    upstreams: UpstreamRegistry,
    transport: Arc<dyn Transport>,
}

impl Gateway {
    /// Create an empty gateway with the given limiter algorithm and cache
    /// capacity, forwarding through `transport`
    pub fn new(
        algorithm: RateLimitAlgorithm,
        cache_capacity: usize,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let consumers = Arc::new(ConsumerRegistry::new());
        Self {
            router: Router::new(),
            auth: AuthManager::new(consumers.clone()),
            consumers,
            limiter: RateLimiter::new(algorithm),
            breakers: CircuitBreakerRegistry::new(),
            cache: ResponseCache::new(cache_capacity),
            upstreams: UpstreamRegistry::new(),
            transport,
        }
    }

    /// Build a fully-populated gateway from a declarative configuration
    pub fn from_config(config: &GatewayConfig, transport: Arc<dyn Transport>) -> GatewayResult<Self> {
        let gateway = Self::new(config.rate_limit_algorithm, config.cache.capacity, transport);

        for def in &config.upstreams {
            let upstream = def.build(config.default_timeouts, config.default_breaker.clone())?;
            gateway.register_upstream(upstream)?;
        }
        for def in &config.routes {
            gateway.add_route(def.build()?)?;
        }
        for def in &config.consumers {
            gateway.register_consumer(def.build())?;
        }

        info!(
            routes = gateway.router.len(),
            upstreams = config.upstreams.len(),
            consumers = config.consumers.len(),
            "gateway configured"
        );
        Ok(gateway)
    }

    /// Build a gateway from configuration with the default HTTP transport
    pub fn from_config_http(config: &GatewayConfig) -> GatewayResult<Self> {
        Self::from_config(config, Arc::new(HttpTransport::new()))
    }

    // --- registration / admin surface ---

    /// Register a route; its upstream must already be registered
    pub fn add_route(&self, route: Route) -> GatewayResult<()> {
        if self.upstreams.get(&route.upstream).is_none() {
            return Err(GatewayError::config(format!(
                "route {} references unknown upstream {}",
                route.id, route.upstream
            )));
        }
        self.router.add_route(route)
    }

    /// Remove a route by id
    pub fn remove_route(&self, id: &str) -> bool {
        self.router.remove_route(id).is_some()
    }

    /// Register an upstream pool
    pub fn register_upstream(&self, upstream: Upstream) -> GatewayResult<()> {
        self.upstreams.register(upstream)
    }

    /// Register a consumer
    pub fn register_consumer(&self, consumer: Consumer) -> GatewayResult<()> {
        self.consumers.register(consumer)
    }

    /// Snapshot of the routing table, highest priority first
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.router.routes()
    }

    /// Registered upstream names
    pub fn upstream_names(&self) -> Vec<String> {
        self.upstreams.names()
    }

    /// Registered consumers
    pub fn consumers(&self) -> Vec<Consumer> {
        self.consumers.list()
    }

    /// Current `(upstream, state)` pairs for all live breakers
    pub fn breaker_states(&self) -> Vec<(String, &'static str)> {
        self.breakers.states()
    }

    /// The breaker for an upstream, if one has been created
    pub fn breaker(&self, upstream: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(upstream)
    }

    /// Response cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop a cached response
    pub fn invalidate_cached(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    /// Administratively mark a target healthy or unhealthy
    pub fn set_target_health(
        &self,
        upstream: &str,
        address: &str,
        healthy: bool,
    ) -> GatewayResult<()> {
        self.upstreams.set_target_health(upstream, address, healthy)
    }

    /// Forget a limiter key's state
    pub fn reset_limiter(&self, caller: &str, route_id: &str) {
        self.limiter.reset(&limiter_key(caller, route_id));
    }

    // --- request handling ---

    /// Run a request through the pipeline and produce a response
    ///
    /// Never returns an error: pipeline failures become structured error
    /// responses with the status mapped from the failure category.
    pub async fn handle(&self, request: IncomingRequest) -> GatewayResponse {
        let started = Instant::now();
        let response = match self.dispatch(&request).await {
            Ok(response) => response,
            Err(err) => self.error_response(&request, &err),
        };
        self.finish(&request, response, started)
    }

    /// Like [`handle`](Self::handle), but aborts with a 499 response when
    /// `token` is cancelled
    ///
    /// Cancellation drops the in-flight forward on the floor: the breaker
    /// records neither success nor failure for it.
    pub async fn handle_cancellable(
        &self,
        request: IncomingRequest,
        token: CancellationToken,
    ) -> GatewayResponse {
        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                counter!("gateway_requests_cancelled").increment(1);
                self.error_response(&request, &GatewayError::Cancelled)
            }
            outcome = self.dispatch(&request) => match outcome {
                Ok(response) => response,
                Err(err) => self.error_response(&request, &err),
            },
        };
        self.finish(&request, response, started)
    }

    async fn dispatch(&self, request: &IncomingRequest) -> GatewayResult<GatewayResponse> {
        // Stage 1: route lookup
        let matched = self
            .router
            .match_route(&request.method, request.path(), request.query())
            .ok_or_else(|| GatewayError::NoRouteMatch {
                method: request.method.to_string(),
                path: request.path().to_string(),
            })?;
        let route = matched.route.clone();
        debug!(request_id = %request.id, route_id = %route.id, "route matched");

        // Stage 2: authentication
        let auth_context = self.auth.authenticate(request, &route)?;

        // Stage 3: rate limiting
        let remaining = self.check_rate_limit(request, &route, auth_context.as_ref())?;

        // The upstream is resolved before the circuit check so the breaker
        // carries that upstream's own settings.
        let upstream = self
            .upstreams
            .get(&route.upstream)
            .ok_or_else(|| GatewayError::UnknownUpstream {
                upstream: route.upstream.clone(),
            })?;

        // Stage 4: circuit check
        let breaker = if route.circuit_breaker {
            let breaker = self
                .breakers
                .get_or_create(&route.upstream, upstream.breaker.clone());
            breaker.can_proceed()?;
            Some(breaker)
        } else {
            None
        };

        // Stage 5: cache lookup
        let cacheable = request.method == Method::GET && route.cache_ttl.is_some();
        let key = cacheable.then(|| cache_key(&route.id, request.path(), &matched.query_params));
        if let Some(key) = &key {
            if let Some(mut cached) = self.cache.get(key) {
                debug!(request_id = %request.id, cache_key = %key, "cache hit");
                set_header(&mut cached.headers, X_CACHE, "HIT");
                set_remaining(&mut cached.headers, remaining);
                return Ok(cached);
            }
        }

        // Stage 6: target selection
        let target = upstream
            .select_target()
            .ok_or_else(|| GatewayError::NoHealthyTarget {
                upstream: upstream.name.clone(),
            })?;

        // Stages 7-8: forward and record the outcome on the breaker
        let mut response = self
            .forward(request, &matched, &upstream, &target, breaker.as_deref())
            .await?;

        // Stage 9: cache store; only successful GET responses are kept
        if let (Some(key), Some(ttl)) = (&key, route.cache_ttl) {
            if response.is_success() {
                self.cache.set(key, response.clone(), ttl);
            }
            set_header(&mut response.headers, X_CACHE, "MISS");
        }
        set_remaining(&mut response.headers, remaining);
        Ok(response)
    }

    /// Apply the route's rate limit, returning the remaining allowance when
    /// a policy is in force
    fn check_rate_limit(
        &self,
        request: &IncomingRequest,
        route: &Route,
        auth_context: Option<&AuthContext>,
    ) -> GatewayResult<Option<u32>> {
        let Some(policy) = route.rate_limit else {
            return Ok(None);
        };

        // Authenticated traffic is keyed by consumer, anonymous by client
        // IP. A consumer-level limit overrides the route limit; the window
        // stays the route's.
        let caller = match auth_context {
            Some(ctx) => ctx.consumer_id.clone(),
            None => request.client_ip.to_string(),
        };
        let limit = auth_context
            .and_then(|ctx| ctx.rate_limit)
            .unwrap_or(policy.limit);

        let key = limiter_key(&caller, &route.id);
        let decision = self.limiter.check(&key, limit, policy.window);
        if !decision.allowed {
            let retry_after_secs = decision.retry_after.as_secs_f64().ceil() as u64;
            warn!(
                request_id = %request.id,
                limiter_key = %key,
                retry_after_secs,
                "rate limit exceeded"
            );
            return Err(GatewayError::RateLimitExceeded {
                key,
                retry_after_secs,
            });
        }
        Ok(Some(decision.remaining))
    }

    async fn forward(
        &self,
        request: &IncomingRequest,
        matched: &RouteMatch,
        upstream: &Upstream,
        target: &Arc<Target>,
        breaker: Option<&CircuitBreaker>,
    ) -> GatewayResult<GatewayResponse> {
        let upstream_request = UpstreamRequest {
            method: request.method.clone(),
            path: matched.route.forward_path(request.path()),
            query: request.query().map(str::to_string),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        let _guard = target.begin_dispatch();
        let outcome = self
            .transport
            .forward(target, &upstream_request, upstream.timeouts)
            .await;

        match outcome {
            Ok(mut response) => {
                // 5xx counts against the breaker; everything else, including
                // 4xx, counts as the upstream answering normally.
                if let Some(breaker) = breaker {
                    if response.status.is_server_error() {
                        breaker.record_failure();
                    } else {
                        breaker.record_success();
                    }
                }
                response.upstream_target = Some(target.address());
                if let Ok(value) = HeaderValue::from_str(&target.address()) {
                    response.headers.insert(X_UPSTREAM_TARGET, value);
                }
                Ok(response)
            }
            Err(transport_error) => {
                let err = match transport_error {
                    TransportError::Timeout => GatewayError::Timeout {
                        upstream: upstream.name.clone(),
                        timeout_ms: upstream.timeouts.total().as_millis() as u64,
                    },
                    TransportError::Failed(reason) => {
                        GatewayError::upstream_failure(upstream.name.clone(), reason)
                    }
                };
                if let Some(breaker) = breaker {
                    if err.counts_as_upstream_failure() {
                        breaker.record_failure();
                    }
                }
                warn!(
                    request_id = %request.id,
                    upstream = %upstream.name,
                    target = %target.address(),
                    error = %err,
                    "forward failed"
                );
                Err(err)
            }
        }
    }

    fn error_response(&self, request: &IncomingRequest, err: &GatewayError) -> GatewayResponse {
        let status = err.status_code();
        let mut response = GatewayResponse::error(status, err.error_type(), &err.to_string());
        if let GatewayError::RateLimitExceeded {
            retry_after_secs, ..
        } = err
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers.insert(RETRY_AFTER, value);
            }
        }
        counter!("gateway_errors_total", "type" => err.error_type()).increment(1);
        debug!(
            request_id = %request.id,
            status = status.as_u16(),
            error_type = err.error_type(),
            "request rejected"
        );
        response
    }

    fn finish(
        &self,
        request: &IncomingRequest,
        mut response: GatewayResponse,
        started: Instant,
    ) -> GatewayResponse {
        response.latency = started.elapsed();
        counter!("gateway_requests_total").increment(1);
        histogram!("gateway_request_duration_seconds").record(response.latency.as_secs_f64());
        info!(
            request_id = %request.id,
            method = %request.method,
            path = request.path(),
            status = response.status.as_u16(),
            latency_ms = response.latency.as_millis() as u64,
            "request completed"
        );
        response
    }
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &'static str) {
    headers.insert(name, HeaderValue::from_static(value));
}

fn set_remaining(headers: &mut HeaderMap, remaining: Option<u32>) {
    if let Some(remaining) = remaining {
        if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
            headers.insert(X_RATELIMIT_REMAINING, value);
        }
    }
}
