//! End-to-end pipeline tests driving a [`Gateway`] against mock transports.

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use portway::{
    BreakerConfig, Consumer, Gateway, GatewayConfig, GatewayResponse, IncomingRequest,
    LoadBalancingAlgorithm, RateLimitAlgorithm, Route, Target, Transport, TransportError,
    Upstream, UpstreamRequest, UpstreamTimeouts,
};
use portway::routing::AuthRequirement;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers 200 and echoes the forwarded path in the body.
struct EchoTransport {
    calls: AtomicUsize,
}

impl EchoTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transport for EchoTransport {
    async fn forward(
        &self,
        _target: &Target,
        request: &UpstreamRequest,
        _timeouts: UpstreamTimeouts,
    ) -> Result<GatewayResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(GatewayResponse::text(StatusCode::OK, request.path.clone()))
    }
}

/// Fails a fixed number of times, then answers 200.
struct FlakyTransport {
    failures: AtomicUsize,
}

impl FlakyTransport {
    fn failing(count: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(count),
        })
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn forward(
        &self,
        _target: &Target,
        _request: &UpstreamRequest,
        _timeouts: UpstreamTimeouts,
    ) -> Result<GatewayResponse, TransportError> {
        let left = self.failures.load(Ordering::Relaxed);
        if left > 0 {
            self.failures.store(left - 1, Ordering::Relaxed);
            return Err(TransportError::Failed("connection refused".to_string()));
        }
        Ok(GatewayResponse::text(StatusCode::OK, "recovered"))
    }
}

fn client_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
}

fn get(path: &str) -> IncomingRequest {
    IncomingRequest::get(path.parse::<Uri>().unwrap(), client_ip())
}

fn get_with_key(path: &str, api_key: &str) -> IncomingRequest {
    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_str(api_key).unwrap());
    IncomingRequest::new(
        Method::GET,
        path.parse::<Uri>().unwrap(),
        headers,
        Vec::new(),
        client_ip(),
    )
}

fn two_target_gateway(transport: Arc<dyn Transport>) -> Gateway {
    let gateway = Gateway::new(RateLimitAlgorithm::FixedWindow, 100, transport);
    gateway
        .register_upstream(
            Upstream::new(
                "backend",
                vec![
                    Target::new("10.0.0.1", 9000, 1),
                    Target::new("10.0.0.2", 9000, 1),
                ],
                LoadBalancingAlgorithm::RoundRobin,
            )
            .unwrap(),
        )
        .unwrap();
    gateway
        .add_route(Route::new("api", "/api/*", vec![], "backend").unwrap())
        .unwrap();
    gateway
}

#[tokio::test]
async fn round_robin_alternates_across_targets() {
    let gateway = two_target_gateway(EchoTransport::new());

    let mut served = Vec::new();
    for _ in 0..4 {
        let response = gateway.handle(get("/api/users")).await;
        assert_eq!(response.status, StatusCode::OK);
        served.push(response.upstream_target.unwrap());
    }
    assert_eq!(
        served,
        vec![
            "10.0.0.1:9000".to_string(),
            "10.0.0.2:9000".to_string(),
            "10.0.0.1:9000".to_string(),
            "10.0.0.2:9000".to_string(),
        ]
    );
}

#[tokio::test]
async fn unhealthy_target_is_skipped_and_restored() {
    let gateway = two_target_gateway(EchoTransport::new());
    gateway
        .set_target_health("backend", "10.0.0.1:9000", false)
        .unwrap();

    for _ in 0..3 {
        let response = gateway.handle(get("/api/users")).await;
        assert_eq!(response.upstream_target.as_deref(), Some("10.0.0.2:9000"));
    }

    gateway
        .set_target_health("backend", "10.0.0.1:9000", true)
        .unwrap();
    let mut seen_first = false;
    for _ in 0..4 {
        let response = gateway.handle(get("/api/users")).await;
        if response.upstream_target.as_deref() == Some("10.0.0.1:9000") {
            seen_first = true;
        }
    }
    assert!(seen_first);
}

#[tokio::test]
async fn prefix_transform_rewrites_forwarded_path() {
    let gateway = Gateway::new(RateLimitAlgorithm::FixedWindow, 10, EchoTransport::new());
    gateway
        .register_upstream(
            Upstream::new(
                "legacy",
                vec![Target::new("127.0.0.1", 8000, 1)],
                LoadBalancingAlgorithm::RoundRobin,
            )
            .unwrap(),
        )
        .unwrap();
    gateway
        .add_route(
            Route::new("legacy", "/api/v2/*", vec![], "legacy")
                .unwrap()
                .with_prefix_transform(
                    Some("/api/v2".to_string()),
                    Some("/internal".to_string()),
                ),
        )
        .unwrap();

    let response = gateway.handle(get("/api/v2/orders/7")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        std::str::from_utf8(&response.body).unwrap(),
        "/internal/orders/7"
    );
}

#[tokio::test]
async fn consumer_auth_and_allow_list() {
    let gateway = two_target_gateway(EchoTransport::new());
    gateway
        .add_route(
            Route::new("orders", "/orders/*", vec![], "backend")
                .unwrap()
                .with_auth(AuthRequirement::ApiKey),
        )
        .unwrap();

    let consumer = Consumer::new("alice", "alice-key").with_allowed_routes(vec!["api".to_string()]);
    gateway.register_consumer(consumer).unwrap();

    // Wrong key fails, right key on a disallowed route is forbidden.
    let bad = gateway.handle(get_with_key("/orders/1", "wrong")).await;
    assert_eq!(bad.status, StatusCode::UNAUTHORIZED);
    let forbidden = gateway.handle(get_with_key("/orders/1", "alice-key")).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn consumer_rate_limit_overrides_route_limit() {
    let gateway = two_target_gateway(EchoTransport::new());
    gateway
        .add_route(
            Route::new("metered", "/metered", vec![], "backend")
                .unwrap()
                .with_auth(AuthRequirement::ApiKey)
                .with_rate_limit(100, Duration::from_secs(60)),
        )
        .unwrap();
    gateway
        .register_consumer(Consumer::new("bob", "bob-key").with_rate_limit(2))
        .unwrap();

    for _ in 0..2 {
        let response = gateway.handle(get_with_key("/metered", "bob-key")).await;
        assert_eq!(response.status, StatusCode::OK);
    }
    let rejected = gateway.handle(get_with_key("/metered", "bob-key")).await;
    assert_eq!(rejected.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn anonymous_limit_is_keyed_per_route() {
    let gateway = two_target_gateway(EchoTransport::new());
    gateway
        .add_route(
            Route::new("tight", "/tight", vec![], "backend")
                .unwrap()
                .with_rate_limit(1, Duration::from_secs(60)),
        )
        .unwrap();

    assert_eq!(gateway.handle(get("/tight")).await.status, StatusCode::OK);
    assert_eq!(
        gateway.handle(get("/tight")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    // Exhausting one route's budget leaves other routes untouched.
    assert_eq!(
        gateway.handle(get("/api/other")).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn breaker_opens_then_recovers_through_probes() {
    let gateway = Gateway::new(RateLimitAlgorithm::FixedWindow, 10, FlakyTransport::failing(2));
    gateway
        .register_upstream(
            Upstream::new(
                "fragile",
                vec![Target::new("10.0.0.9", 7000, 1)],
                LoadBalancingAlgorithm::RoundRobin,
            )
            .unwrap()
            .with_breaker(BreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::ZERO,
                half_open_requests: 1,
            }),
        )
        .unwrap();
    gateway
        .add_route(Route::new("fragile", "/f/*", vec![], "fragile").unwrap())
        .unwrap();

    // Two transport failures trip the breaker open.
    for _ in 0..2 {
        let response = gateway.handle(get("/f/x")).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    }
    assert_eq!(
        gateway.breaker_states(),
        vec![("fragile".to_string(), "open")]
    );

    // Zero recovery timeout means the next request is admitted as a probe;
    // its success closes the circuit.
    let probe = gateway.handle(get("/f/x")).await;
    assert_eq!(probe.status, StatusCode::OK);
    assert_eq!(
        gateway.breaker_states(),
        vec![("fragile".to_string(), "closed")]
    );
    assert_eq!(gateway.handle(get("/f/x")).await.status, StatusCode::OK);
}

#[tokio::test]
async fn gateway_from_config_serves_requests() {
    let yaml = r#"
rate_limit_algorithm: fixed_window
cache:
  capacity: 10
upstreams:
  - name: users
    targets:
      - host: 10.1.0.1
        port: 8080
routes:
  - id: users
    pattern: /users/{id}
    methods: [GET]
    upstream: users
    auth: api_key
    cache_ttl: 30s
consumers:
  - name: carol
    api_key: carol-key
"#;
    let config = GatewayConfig::from_yaml(yaml).unwrap();
    let gateway = Gateway::from_config(&config, EchoTransport::new()).unwrap();

    let anonymous = gateway.handle(get("/users/42")).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let first = gateway.handle(get_with_key("/users/42", "carol-key")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.headers.get("x-cache").unwrap(), "MISS");

    let second = gateway.handle(get_with_key("/users/42", "carol-key")).await;
    assert_eq!(second.headers.get("x-cache").unwrap(), "HIT");

    // POST is not in the route's method list.
    let post = IncomingRequest::new(
        Method::POST,
        "/users/42".parse().unwrap(),
        HeaderMap::new(),
        Vec::new(),
        client_ip(),
    );
    assert_eq!(gateway.handle(post).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn higher_priority_route_wins() {
    let gateway = two_target_gateway(EchoTransport::new());
    gateway
        .add_route(
            Route::new("api-admin", "/api/admin", vec![], "backend")
                .unwrap()
                .with_priority(10)
                .with_prefix_transform(Some("/api".to_string()), Some("/restricted".to_string())),
        )
        .unwrap();

    let response = gateway.handle(get("/api/admin")).await;
    assert_eq!(std::str::from_utf8(&response.body).unwrap(), "/restricted/admin");
}
