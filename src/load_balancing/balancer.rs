//! # Load Balancing Strategies
//!
//! Target selection over an upstream's healthy pool. Each upstream owns one
//! selector instance, so round-robin counters are per-upstream and survive
//! changes in the healthy set (the modulo simply re-maps when the set
//! shrinks or grows; the counter is never reset).
//!
//! Selectors receive the already-filtered healthy slice and return an index
//! into it, or `None` when the slice is empty. The caller turns that into
//! "no healthy target", never a fallback pick.

use crate::upstream::Target;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Which balancing algorithm an upstream uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingAlgorithm {
    RoundRobin,
    Random,
    Weighted,
    LeastConnections,
}

/// A target selection strategy
pub trait TargetSelector: Send + Sync {
    /// Pick an index into the healthy slice, or `None` if it is empty
    fn select(&self, healthy: &[Arc<Target>]) -> Option<usize>;

    /// Algorithm name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Monotonic-counter round robin
pub struct RoundRobinSelector {
    counter: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSelector for RoundRobinSelector {
    fn select(&self, healthy: &[Arc<Target>]) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(index)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Uniform random choice
pub struct RandomSelector;

impl TargetSelector for RandomSelector {
    fn select(&self, healthy: &[Arc<Target>]) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..healthy.len()))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Weight-proportional choice via a cumulative-weight walk
pub struct WeightedSelector;

impl TargetSelector for WeightedSelector {
    fn select(&self, healthy: &[Arc<Target>]) -> Option<usize> {
        let total: u64 = healthy.iter().map(|t| t.weight as u64).sum();
        if total == 0 {
            // All healthy targets have weight 0; nothing is selectable.
            return None;
        }
        let draw = rand::thread_rng().gen_range(0..total);
        let mut cumulative = 0u64;
        for (index, target) in healthy.iter().enumerate() {
            cumulative += target.weight as u64;
            if draw < cumulative {
                return Some(index);
            }
        }
        // Unreachable with total > 0, but never panic on the request path.
        Some(healthy.len() - 1)
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// Fewest in-flight requests wins
///
/// Reads the per-target dispatch counters maintained by the gateway's
/// in-flight guards, so the decision reflects requests actually running.
pub struct LeastConnectionsSelector;

impl TargetSelector for LeastConnectionsSelector {
    fn select(&self, healthy: &[Arc<Target>]) -> Option<usize> {
        healthy
            .iter()
            .enumerate()
            .min_by_key(|(_, target)| target.in_flight())
            .map(|(index, _)| index)
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

/// Build the selector for an algorithm selection
pub fn selector_for(algorithm: LoadBalancingAlgorithm) -> Box<dyn TargetSelector> {
    match algorithm {
        LoadBalancingAlgorithm::RoundRobin => Box::new(RoundRobinSelector::new()),
        LoadBalancingAlgorithm::Random => Box::new(RandomSelector),
        LoadBalancingAlgorithm::Weighted => Box::new(WeightedSelector),
        LoadBalancingAlgorithm::LeastConnections => Box::new(LeastConnectionsSelector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(weights: &[u32]) -> Vec<Arc<Target>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| Arc::new(Target::new(format!("10.0.0.{}", i + 1), 8080, w)))
            .collect()
    }

    #[test]
    fn test_round_robin_alternates_strictly() {
        let selector = RoundRobinSelector::new();
        let pool = targets(&[1, 1]);

        let picks: Vec<usize> = (0..4).map(|_| selector.select(&pool).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_round_robin_counter_survives_pool_resize() {
        let selector = RoundRobinSelector::new();
        let three = targets(&[1, 1, 1]);
        selector.select(&three).unwrap(); // counter -> 1
        selector.select(&three).unwrap(); // counter -> 2

        // Pool shrinks; the counter keeps counting and re-maps by modulo.
        let two = targets(&[1, 1]);
        assert_eq!(selector.select(&two).unwrap(), 0); // 2 % 2
        assert_eq!(selector.select(&two).unwrap(), 1); // 3 % 2
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let pool: Vec<Arc<Target>> = Vec::new();
        assert!(RoundRobinSelector::new().select(&pool).is_none());
        assert!(RandomSelector.select(&pool).is_none());
        assert!(WeightedSelector.select(&pool).is_none());
        assert!(LeastConnectionsSelector.select(&pool).is_none());
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let selector = RandomSelector;
        let pool = targets(&[1, 1, 1]);
        for _ in 0..100 {
            assert!(selector.select(&pool).unwrap() < 3);
        }
    }

    #[test]
    fn test_weighted_distribution_converges() {
        let selector = WeightedSelector;
        let pool = targets(&[50, 30, 20]);
        let mut counts = [0u32; 3];

        for _ in 0..10_000 {
            counts[selector.select(&pool).unwrap()] += 1;
        }

        // Within a few percentage points of 50/30/20.
        assert!((counts[0] as f64 / 10_000.0 - 0.50).abs() < 0.04);
        assert!((counts[1] as f64 / 10_000.0 - 0.30).abs() < 0.04);
        assert!((counts[2] as f64 / 10_000.0 - 0.20).abs() < 0.04);
    }

    #[test]
    fn test_weighted_never_selects_zero_weight() {
        let selector = WeightedSelector;
        let pool = targets(&[0, 10]);
        for _ in 0..1_000 {
            assert_eq!(selector.select(&pool).unwrap(), 1);
        }
    }

    #[test]
    fn test_weighted_all_zero_weights_selects_nothing() {
        let selector = WeightedSelector;
        let pool = targets(&[0, 0]);
        assert!(selector.select(&pool).is_none());
    }

    #[test]
    fn test_least_connections_prefers_idle_target() {
        let selector = LeastConnectionsSelector;
        let pool = targets(&[1, 1, 1]);

        let _busy = pool[0].begin_dispatch();
        let _busier = (pool[1].begin_dispatch(), pool[1].begin_dispatch());

        assert_eq!(selector.select(&pool).unwrap(), 2);
    }
}
