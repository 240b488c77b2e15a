//! # Rate Limiting Strategies
//!
//! Three interchangeable admission algorithms behind one trait, selected
//! when the limiter is constructed (never per call):
//!
//! - **Fixed window**: the counter resets every window. A burst at a window
//!   boundary can admit up to 2×limit requests across the boundary; this is
//!   documented behavior, not a bug to fix.
//! - **Sliding window**: the current count is weighted by how much of the
//!   window has elapsed (`effective = floor(count × (1 - elapsed/window))`)
//!   before admitting. A linear interpolation, not a sliding log; changing
//!   it would change observable admission timing.
//! - **Token bucket**: tokens refill continuously at `limit/window` per
//!   second, capped at `limit`; each admitted request spends one token.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Which admission algorithm a limiter uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

/// Mutable per-key limiter state
///
/// One of these exists per limiter key for the process lifetime. The window
/// fields serve the windowed strategies; the token fields serve the bucket.
#[derive(Debug, Clone)]
pub struct KeyState {
    pub(crate) window_start: Instant,
    pub(crate) count: u32,
    pub(crate) tokens: f64,
    pub(crate) last_refill: Instant,
}

impl KeyState {
    /// Fresh state: empty window, full bucket
    pub(crate) fn new(now: Instant, limit: u32) -> Self {
        Self {
            window_start: now,
            count: 0,
            tokens: limit as f64,
            last_refill: now,
        }
    }
}

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Requests left in the current window (or whole tokens left)
    pub remaining: u32,
    /// How long a rejected caller should wait before retrying
    pub retry_after: Duration,
}

/// An admission algorithm operating on per-key state
///
/// Implementations are pure functions of `(state, limit, window, now)`; the
/// caller holds the per-key lock for the duration of the call.
pub trait RateLimitStrategy: Send + Sync {
    /// Run one admission check, mutating the key state
    fn check(
        &self,
        state: &mut KeyState,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision;

    /// Algorithm name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Fixed-window counter
pub struct FixedWindow;

impl RateLimitStrategy for FixedWindow {
    fn check(
        &self,
        state: &mut KeyState,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        let elapsed = now.duration_since(state.window_start);
        if elapsed >= window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count < limit {
            state.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: limit - state.count,
                retry_after: Duration::ZERO,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: window.saturating_sub(now.duration_since(state.window_start)),
            }
        }
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

/// Sliding-window counter with linear interpolation
pub struct SlidingWindow;

impl RateLimitStrategy for SlidingWindow {
    fn check(
        &self,
        state: &mut KeyState,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        let mut elapsed = now.duration_since(state.window_start);
        if elapsed >= window {
            state.window_start = now;
            state.count = 0;
            elapsed = Duration::ZERO;
        }

        // Occupancy decays linearly as the window ages.
        let weight = 1.0 - elapsed.as_secs_f64() / window.as_secs_f64();
        let effective = (state.count as f64 * weight).floor() as u32;

        if effective < limit {
            state.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: limit - effective - 1,
                retry_after: Duration::ZERO,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: window.saturating_sub(elapsed),
            }
        }
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}

/// Continuously refilling token bucket
pub struct TokenBucket;

impl RateLimitStrategy for TokenBucket {
    fn check(
        &self,
        state: &mut KeyState,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        let rate = limit as f64 / window.as_secs_f64();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * rate).min(limit as f64);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            RateLimitDecision {
                allowed: true,
                remaining: state.tokens.floor() as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let deficit = 1.0 - state.tokens;
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Duration::from_secs_f64(deficit / rate),
            }
        }
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}

/// Build the strategy for an algorithm selection
pub fn strategy_for(algorithm: RateLimitAlgorithm) -> Box<dyn RateLimitStrategy> {
    match algorithm {
        RateLimitAlgorithm::FixedWindow => Box::new(FixedWindow),
        RateLimitAlgorithm::SlidingWindow => Box::new(SlidingWindow),
        RateLimitAlgorithm::TokenBucket => Box::new(TokenBucket),
    }
}
