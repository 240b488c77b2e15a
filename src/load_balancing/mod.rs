//! # Load Balancing Module
//!
//! Target selection strategies over an upstream's healthy pool: round robin,
//! weighted, least connections and random.

pub mod balancer;

pub use balancer::{
    selector_for, LeastConnectionsSelector, LoadBalancingAlgorithm, RandomSelector,
    RoundRobinSelector, TargetSelector, WeightedSelector,
};
