//! # Cache Key Generation
//!
//! Deterministic keys for the response cache. A key combines the route id,
//! the raw request path, and a canonical (sorted) serialization of the query
//! parameters, so `?a=1&b=2` and `?b=2&a=1` share one cache entry instead of
//! fragmenting the cache.

use std::collections::HashMap;

/// Build the cache key for a request on a route
pub fn cache_key(route_id: &str, path: &str, query_params: &HashMap<String, String>) -> String {
    if query_params.is_empty() {
        return format!("{route_id}:{path}");
    }

    let mut pairs: Vec<(&String, &String)> = query_params.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));

    let canonical: Vec<String> = pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("{route_id}:{path}?{}", canonical.join("&"))
}
