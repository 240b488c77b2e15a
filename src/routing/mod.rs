//! # Routing Module
//!
//! Compiled path patterns and the priority-ordered route table that maps an
//! inbound method and path to a route definition.

pub mod matcher;
pub mod router;

pub use matcher::PathPattern;
pub use router::{AuthRequirement, RateLimitPolicy, Route, RouteMatch, Router};
