//! # Caching Module
//!
//! TTL-bounded response cache with deterministic keys, lazy expiry and
//! oldest-entry eviction.

pub mod key;
pub mod response_cache;

pub use key::cache_key;
pub use response_cache::{CacheStats, ResponseCache};
