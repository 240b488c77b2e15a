//! # Rate Limiter
//!
//! Per-key request admission. The limiter owns a concurrent map of key
//! states; each check is an atomic read-modify-write on one key's entry (the
//! `DashMap` entry guard is the per-key lock; there is no global lock on
//! the admission path).
//!
//! Keys combine the caller identity (consumer id, or client IP for
//! anonymous traffic) with the route id, so limits apply per caller per
//! route. State lives for the process lifetime and is never persisted.

pub mod strategies;

use dashmap::DashMap;
use metrics::counter;
use std::time::{Duration, Instant};
use strategies::{strategy_for, KeyState, RateLimitStrategy};
use tracing::debug;

pub use strategies::{RateLimitAlgorithm, RateLimitDecision};

/// Build the limiter key for a caller on a route
pub fn limiter_key(caller: &str, route_id: &str) -> String {
    format!("{caller}:{route_id}")
}

/// Keyed admission control with one algorithm per limiter instance
pub struct RateLimiter {
    algorithm: RateLimitAlgorithm,
    strategy: Box<dyn RateLimitStrategy>,
    states: DashMap<String, KeyState>,
}

impl RateLimiter {
    /// Create a limiter using the given algorithm
    pub fn new(algorithm: RateLimitAlgorithm) -> Self {
        Self {
            algorithm,
            strategy: strategy_for(algorithm),
            states: DashMap::new(),
        }
    }

    /// The algorithm this limiter was built with
    pub fn algorithm(&self) -> RateLimitAlgorithm {
        self.algorithm
    }

    /// Run an admission check with the current time
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        self.check_at(key, limit, window, Instant::now())
    }

    /// Run an admission check at the given instant
    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        let mut entry = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(now, limit));
        let decision = self.strategy.check(entry.value_mut(), limit, window, now);

        if decision.allowed {
            counter!("gateway_ratelimit_allowed").increment(1);
        } else {
            counter!("gateway_ratelimit_denied").increment(1);
            debug!(
                key,
                limit,
                algorithm = self.strategy.name(),
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// Drop the state for a key (administrative reset)
    pub fn reset(&self, key: &str) {
        self.states.remove(key);
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }
}
