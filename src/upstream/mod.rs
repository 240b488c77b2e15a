//! # Upstream Module
//!
//! Upstreams are named backend services with a pool of targets. Target
//! health and in-flight counts are atomics so the selection path never takes
//! a lock; the target list itself is fixed at registration.
//!
//! In-flight tracking is the data source for least-connections balancing:
//! the gateway takes an [`InFlightGuard`] when it dispatches to a target and
//! the count drops when the guard does, however the forward ends.

pub mod transport;

use crate::core::circuit_breaker::BreakerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::load_balancing::{selector_for, LoadBalancingAlgorithm, TargetSelector};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A concrete backend endpoint belonging to an upstream
#[derive(Debug)]
pub struct Target {
    /// Hostname or IP
    pub host: String,

    /// Port
    pub port: u16,

    /// Relative weight for weighted balancing; 0 is never selected
    pub weight: u32,

    healthy: AtomicBool,
    in_flight: AtomicUsize,
}

impl Target {
    /// Create a healthy target with the given weight
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
            healthy: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// `host:port` form used in logs and the `X-Upstream-Target` header
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Current health flag
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Flip the health flag (administrative, or driven by health checks)
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Requests currently dispatched to this target
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Count a dispatch against this target until the guard drops
    pub fn begin_dispatch(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            target: Arc::clone(self),
        }
    }
}

/// RAII guard for a dispatched request
///
/// Dropping the guard decrements the target's in-flight count, so the count
/// stays correct on success, failure, timeout and cancellation alike.
pub struct InFlightGuard {
    target: Arc<Target>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.target.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Connect/read timeout budget for an upstream's forwarded calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpstreamTimeouts {
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    #[serde(with = "humantime_serde")]
    pub read: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            read: Duration::from_secs(10),
        }
    }
}

impl UpstreamTimeouts {
    /// Total deadline applied around one forwarded call
    pub fn total(&self) -> Duration {
        self.connect + self.read
    }
}

/// A named backend service and its target pool
pub struct Upstream {
    /// Upstream name, referenced by routes
    pub name: String,

    /// Target pool, fixed at registration
    pub targets: Vec<Arc<Target>>,

    /// Balancing algorithm for this pool
    pub algorithm: LoadBalancingAlgorithm,

    /// Timeout budget for forwarded calls
    pub timeouts: UpstreamTimeouts,

    /// Circuit breaker settings for this upstream
    pub breaker: BreakerConfig,

    selector: Box<dyn TargetSelector>,
}

impl Upstream {
    /// Create an upstream, validating its target pool
    pub fn new(
        name: impl Into<String>,
        targets: Vec<Target>,
        algorithm: LoadBalancingAlgorithm,
    ) -> GatewayResult<Self> {
        let name = name.into();
        if targets.is_empty() {
            return Err(GatewayError::config(format!(
                "upstream {name} has no targets"
            )));
        }
        if algorithm == LoadBalancingAlgorithm::Weighted
            && targets.iter().map(|t| t.weight as u64).sum::<u64>() == 0
        {
            return Err(GatewayError::config(format!(
                "upstream {name} uses weighted balancing but has zero total weight"
            )));
        }

        Ok(Self {
            name,
            targets: targets.into_iter().map(Arc::new).collect(),
            algorithm,
            timeouts: UpstreamTimeouts::default(),
            breaker: BreakerConfig::default(),
            selector: selector_for(algorithm),
        })
    }

    /// Override the timeout budget
    pub fn with_timeouts(mut self, timeouts: UpstreamTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the breaker settings
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Select a target from the healthy subset of the pool
    ///
    /// Returns `None` when no target is healthy; the caller must surface
    /// that as 503, never fall back to an unhealthy target.
    pub fn select_target(&self) -> Option<Arc<Target>> {
        let healthy: Vec<Arc<Target>> = self
            .targets
            .iter()
            .filter(|target| target.is_healthy())
            .cloned()
            .collect();
        if healthy.is_empty() {
            warn!(upstream = %self.name, "no healthy targets");
            counter!("gateway_selection_failures").increment(1);
            return None;
        }

        let index = self.selector.select(&healthy)?;
        let selected = healthy[index].clone();
        debug!(
            upstream = %self.name,
            target = %selected.address(),
            algorithm = self.selector.name(),
            "target selected"
        );
        Some(selected)
    }

    /// Find a target by `host:port` address
    pub fn target(&self, address: &str) -> Option<Arc<Target>> {
        self.targets
            .iter()
            .find(|target| target.address() == address)
            .cloned()
    }
}

/// Registry of upstreams keyed by name
#[derive(Default)]
pub struct UpstreamRegistry {
    upstreams: DashMap<String, Arc<Upstream>>,
}

impl UpstreamRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            upstreams: DashMap::new(),
        }
    }

    /// Register an upstream; rejects a duplicate name
    pub fn register(&self, upstream: Upstream) -> GatewayResult<()> {
        if self.upstreams.contains_key(&upstream.name) {
            return Err(GatewayError::config(format!(
                "duplicate upstream name: {}",
                upstream.name
            )));
        }
        self.upstreams
            .insert(upstream.name.clone(), Arc::new(upstream));
        Ok(())
    }

    /// Look up an upstream by name
    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).map(|entry| entry.clone())
    }

    /// Remove an upstream
    pub fn remove(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.remove(name).map(|(_, upstream)| upstream)
    }

    /// Names of all registered upstreams
    pub fn names(&self) -> Vec<String> {
        self.upstreams.iter().map(|e| e.key().clone()).collect()
    }

    /// Flip the health flag of one target
    pub fn set_target_health(
        &self,
        upstream: &str,
        address: &str,
        healthy: bool,
    ) -> GatewayResult<()> {
        let upstream = self.get(upstream).ok_or_else(|| {
            GatewayError::config(format!("unknown upstream: {upstream}"))
        })?;
        let target = upstream.target(address).ok_or_else(|| {
            GatewayError::config(format!(
                "unknown target {address} on upstream {}",
                upstream.name
            ))
        })?;
        target.set_healthy(healthy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_target_upstream(algorithm: LoadBalancingAlgorithm) -> Upstream {
        Upstream::new(
            "users",
            vec![Target::new("10.0.0.1", 8080, 1), Target::new("10.0.0.2", 8080, 1)],
            algorithm,
        )
        .unwrap()
    }

    #[test]
    fn test_registration_validation() {
        assert!(Upstream::new("empty", vec![], LoadBalancingAlgorithm::RoundRobin).is_err());
        assert!(Upstream::new(
            "zero-weight",
            vec![Target::new("10.0.0.1", 80, 0)],
            LoadBalancingAlgorithm::Weighted,
        )
        .is_err());
        // Zero weight is fine for non-weighted algorithms.
        assert!(Upstream::new(
            "ok",
            vec![Target::new("10.0.0.1", 80, 0)],
            LoadBalancingAlgorithm::RoundRobin,
        )
        .is_ok());
    }

    #[test]
    fn test_selection_skips_unhealthy_targets() {
        let upstream = two_target_upstream(LoadBalancingAlgorithm::RoundRobin);
        upstream.targets[0].set_healthy(false);

        for _ in 0..4 {
            let selected = upstream.select_target().unwrap();
            assert_eq!(selected.address(), "10.0.0.2:8080");
        }
    }

    #[test]
    fn test_no_healthy_targets_yields_none() {
        let upstream = two_target_upstream(LoadBalancingAlgorithm::RoundRobin);
        for target in &upstream.targets {
            target.set_healthy(false);
        }
        assert!(upstream.select_target().is_none());
    }

    #[test]
    fn test_in_flight_guard_tracks_dispatches() {
        let target = Arc::new(Target::new("10.0.0.1", 8080, 1));
        assert_eq!(target.in_flight(), 0);

        let guard_a = target.begin_dispatch();
        let guard_b = target.begin_dispatch();
        assert_eq!(target.in_flight(), 2);

        drop(guard_a);
        assert_eq!(target.in_flight(), 1);
        drop(guard_b);
        assert_eq!(target.in_flight(), 0);
    }

    #[test]
    fn test_registry_duplicate_name_rejected() {
        let registry = UpstreamRegistry::new();
        registry
            .register(two_target_upstream(LoadBalancingAlgorithm::RoundRobin))
            .unwrap();
        assert!(registry
            .register(two_target_upstream(LoadBalancingAlgorithm::RoundRobin))
            .is_err());
    }

    #[test]
    fn test_set_target_health() {
        let registry = UpstreamRegistry::new();
        registry
            .register(two_target_upstream(LoadBalancingAlgorithm::RoundRobin))
            .unwrap();

        registry
            .set_target_health("users", "10.0.0.1:8080", false)
            .unwrap();
        let upstream = registry.get("users").unwrap();
        assert!(!upstream.targets[0].is_healthy());

        assert!(registry.set_target_health("ghost", "x", true).is_err());
        assert!(registry
            .set_target_health("users", "1.2.3.4:1", true)
            .is_err());
    }
}
