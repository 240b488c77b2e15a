//! # Circuit Breaker
//!
//! Per-upstream failure-isolation state machine with three states:
//!
//! - **Closed**: requests pass through. Each failure increments the failure
//!   count, each success decrements it (floor 0); reaching the failure
//!   threshold opens the circuit.
//! - **Open**: requests are rejected until the recovery timeout has elapsed
//!   since the circuit opened; the next admission check then moves to
//!   HalfOpen.
//! - **HalfOpen**: at most `half_open_requests` probe requests are admitted.
//!   That many successes close the circuit; a single failure reopens it.
//!
//! One breaker instance exists per upstream, shared by every route that
//! targets it. State is a small word behind a `parking_lot::Mutex`; admission
//! checks and result recording are short critical sections.

use crate::core::error::{GatewayError, GatewayResult};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker state machine
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerState {
    /// Normal operation; tracks consecutive-weighted failures
    Closed { failure_count: u32 },

    /// Rejecting requests; records when the circuit opened
    Open { opened_at: Instant },

    /// Probing recovery; tracks admitted probes and their successes
    HalfOpen { probes: u32, success_count: u32 },
}

impl BreakerState {
    /// Short label for logs and admin introspection
    pub fn label(&self) -> &'static str {
        match self {
            BreakerState::Closed { .. } => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen { .. } => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures (net of successes) before opening the circuit
    pub failure_threshold: u32,

    /// How long to stay open before probing recovery
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Probe budget in HalfOpen; also the successes required to close
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_requests: 3,
        }
    }
}

/// Per-upstream circuit breaker
pub struct CircuitBreaker {
    upstream: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker for the named upstream
    pub fn new(upstream: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            upstream: upstream.into(),
            config,
            state: Mutex::new(BreakerState::Closed { failure_count: 0 }),
        }
    }

    /// Check whether a request may proceed, using the current time
    pub fn can_proceed(&self) -> GatewayResult<()> {
        self.can_proceed_at(Instant::now())
    }

    /// Check whether a request may proceed at the given instant
    ///
    /// Drives the Open → HalfOpen transition once the recovery timeout has
    /// elapsed, and enforces the HalfOpen probe budget.
    pub fn can_proceed_at(&self, now: Instant) -> GatewayResult<()> {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { opened_at } => {
                if now.duration_since(opened_at) >= self.config.recovery_timeout {
                    debug!(upstream = %self.upstream, "circuit half-open, admitting probe");
                    *state = BreakerState::HalfOpen {
                        probes: 1,
                        success_count: 0,
                    };
                    Ok(())
                } else {
                    counter!("gateway_breaker_rejections").increment(1);
                    Err(GatewayError::CircuitOpen {
                        upstream: self.upstream.clone(),
                    })
                }
            }
            BreakerState::HalfOpen {
                probes,
                success_count,
            } => {
                if probes < self.config.half_open_requests {
                    *state = BreakerState::HalfOpen {
                        probes: probes + 1,
                        success_count,
                    };
                    Ok(())
                } else {
                    counter!("gateway_breaker_rejections").increment(1);
                    Err(GatewayError::CircuitOpen {
                        upstream: self.upstream.clone(),
                    })
                }
            }
        }
    }

    /// Record a successful upstream call
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { failure_count } => {
                *state = BreakerState::Closed {
                    failure_count: failure_count.saturating_sub(1),
                };
            }
            // Stale result from before the circuit opened; ignore.
            BreakerState::Open { .. } => {}
            BreakerState::HalfOpen {
                probes,
                success_count,
            } => {
                let success_count = success_count + 1;
                if success_count >= self.config.half_open_requests {
                    debug!(upstream = %self.upstream, "circuit closed after recovery probes");
                    *state = BreakerState::Closed { failure_count: 0 };
                } else {
                    *state = BreakerState::HalfOpen {
                        probes,
                        success_count,
                    };
                }
            }
        }
    }

    /// Record a failed upstream call, using the current time
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failed upstream call at the given instant
    pub fn record_failure_at(&self, now: Instant) {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { failure_count } => {
                let failure_count = failure_count + 1;
                if failure_count >= self.config.failure_threshold {
                    warn!(
                        upstream = %self.upstream,
                        failures = failure_count,
                        "circuit opened"
                    );
                    counter!("gateway_breaker_opens").increment(1);
                    *state = BreakerState::Open { opened_at: now };
                } else {
                    *state = BreakerState::Closed { failure_count };
                }
            }
            BreakerState::Open { .. } => {}
            BreakerState::HalfOpen { .. } => {
                warn!(upstream = %self.upstream, "probe failed, circuit reopened");
                counter!("gateway_breaker_opens").increment(1);
                *state = BreakerState::Open { opened_at: now };
            }
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> BreakerState {
        self.state.lock().clone()
    }

    /// Upstream this breaker guards
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Breaker configuration
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Administrative override: open the circuit now
    pub fn force_open(&self) {
        *self.state.lock() = BreakerState::Open {
            opened_at: Instant::now(),
        };
    }

    /// Administrative override: close the circuit and clear counts
    pub fn force_close(&self) {
        *self.state.lock() = BreakerState::Closed { failure_count: 0 };
    }
}

/// Registry of circuit breakers, one per upstream name
///
/// Routes never own breakers; they share the per-upstream instance held
/// here, so failures observed via one route protect every other route
/// targeting the same upstream.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for an upstream, creating it with `config` if absent
    pub fn get_or_create(&self, upstream: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(upstream.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(upstream, config)))
            .clone()
    }

    /// Look up an existing breaker
    pub fn get(&self, upstream: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(upstream).map(|entry| entry.clone())
    }

    /// Remove an upstream's breaker (when the upstream is deregistered)
    pub fn remove(&self, upstream: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(upstream).map(|(_, breaker)| breaker)
    }

    /// State labels for every registered breaker
    pub fn states(&self) -> Vec<(String, &'static str)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state().label()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            half_open_requests: 2,
        }
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = CircuitBreaker::new("users", test_config());
        assert_eq!(breaker.state(), BreakerState::Closed { failure_count: 0 });
        assert!(breaker.can_proceed().is_ok());
    }

    #[test]
    fn test_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("users", test_config());
        let now = Instant::now();

        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        assert_eq!(breaker.state(), BreakerState::Closed { failure_count: 2 });

        breaker.record_failure_at(now);
        assert!(matches!(breaker.state(), BreakerState::Open { .. }));
        assert!(matches!(
            breaker.can_proceed_at(now),
            Err(GatewayError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_decrements_failure_count() {
        let breaker = CircuitBreaker::new("users", test_config());
        let now = Instant::now();

        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed { failure_count: 1 });

        // Floor at zero, never underflows.
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed { failure_count: 0 });
    }

    #[test]
    fn test_open_transitions_to_half_open_after_timeout() {
        let breaker = CircuitBreaker::new("users", test_config());
        let opened = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(opened);
        }

        // Still open inside the recovery window.
        assert!(breaker
            .can_proceed_at(opened + Duration::from_secs(29))
            .is_err());

        // First admission after the window becomes a half-open probe.
        assert!(breaker
            .can_proceed_at(opened + Duration::from_secs(30))
            .is_ok());
        assert_eq!(
            breaker.state(),
            BreakerState::HalfOpen {
                probes: 1,
                success_count: 0
            }
        );
    }

    #[test]
    fn test_half_open_probe_budget() {
        let breaker = CircuitBreaker::new("users", test_config());
        let opened = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(opened);
        }
        let later = opened + Duration::from_secs(31);

        assert!(breaker.can_proceed_at(later).is_ok());
        assert!(breaker.can_proceed_at(later).is_ok());
        // Budget of 2 exhausted without recorded results.
        assert!(breaker.can_proceed_at(later).is_err());
    }

    #[test]
    fn test_half_open_successes_close_the_circuit() {
        let breaker = CircuitBreaker::new("users", test_config());
        let opened = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(opened);
        }
        let later = opened + Duration::from_secs(31);

        breaker.can_proceed_at(later).unwrap();
        breaker.record_success();
        assert_eq!(
            breaker.state(),
            BreakerState::HalfOpen {
                probes: 1,
                success_count: 1
            }
        );

        breaker.can_proceed_at(later).unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed { failure_count: 0 });
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("users", test_config());
        let opened = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(opened);
        }
        let later = opened + Duration::from_secs(31);

        breaker.can_proceed_at(later).unwrap();
        breaker.record_failure_at(later);
        assert!(matches!(breaker.state(), BreakerState::Open { .. }));
        assert!(breaker.can_proceed_at(later).is_err());
    }

    #[test]
    fn test_manual_overrides() {
        let breaker = CircuitBreaker::new("users", test_config());
        breaker.force_open();
        assert!(breaker.can_proceed().is_err());
        breaker.force_close();
        assert!(breaker.can_proceed().is_ok());
    }

    #[test]
    fn test_registry_shares_instances() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("users", test_config());
        let b = registry.get_or_create("users", BreakerConfig::default());
        assert!(Arc::ptr_eq(&a, &b));

        let states = registry.states();
        assert_eq!(states, vec![("users".to_string(), "closed")]);

        assert!(registry.remove("users").is_some());
        assert!(registry.get("users").is_none());
    }
}
