//! # Response Cache
//!
//! TTL-keyed cache of upstream responses with bounded size. Expiry is lazy:
//! an entry past its deadline is treated as absent and removed when a lookup
//! touches it. When the cache is full, inserting evicts the single entry
//! with the oldest creation time: age-based eviction by insertion, not LRU
//! by access.
//!
//! The cache itself is policy-free about what goes in; the gateway only
//! stores successful GET responses (and only for routes with a TTL).

use crate::core::types::GatewayResponse;
use dashmap::DashMap;
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// One cached response
#[derive(Debug)]
struct CacheEntry {
    response: GatewayResponse,
    created_at: Instant,
    expires_at: Instant,
    hits: AtomicU64,
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded TTL response cache
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a key with the current time
    pub fn get(&self, key: &str) -> Option<GatewayResponse> {
        self.get_at(key, Instant::now())
    }

    /// Look up a key at the given instant
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<GatewayResponse> {
        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("gateway_cache_hits").increment(1);
                return Some(entry.response.clone());
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("gateway_cache_misses").increment(1);
            return None;
        }

        // Past the deadline: drop it on the way out.
        debug!(key, "cache entry expired");
        self.entries.remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_cache_misses").increment(1);
        None
    }

    /// Store a response with the current time
    pub fn set(&self, key: &str, response: GatewayResponse, ttl: Duration) {
        self.set_at(key, response, ttl, Instant::now());
    }

    /// Store a response at the given instant
    ///
    /// At capacity, the entry with the oldest `created_at` is evicted before
    /// the insert (unless the key is already present, which replaces).
    pub fn set_at(&self, key: &str, response: GatewayResponse, ttl: Duration, now: Instant) {
        if ttl.is_zero() {
            return;
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                response,
                created_at: now,
                expires_at: now + ttl,
                hits: AtomicU64::new(0),
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            debug!(key = %key, "evicting oldest cache entry");
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            counter!("gateway_cache_evictions").increment(1);
        }
    }

    /// Hit count of one entry, if present (admin introspection)
    pub fn entry_hits(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .map(|entry| entry.hits.load(Ordering::Relaxed))
    }

    /// Remove a single entry
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot of cache counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn response(body: &str) -> GatewayResponse {
        GatewayResponse::text(StatusCode::OK, body)
    }

    #[test]
    fn test_get_within_ttl_returns_stored_response() {
        let cache = ResponseCache::new(10);
        let now = Instant::now();
        cache.set_at("k", response("payload"), Duration::from_secs(60), now);

        let cached = cache
            .get_at("k", now + Duration::from_secs(59))
            .expect("entry should still be live");
        assert_eq!(cached.body.as_ref(), b"payload");
        assert_eq!(cache.entry_hits("k"), Some(1));
    }

    #[test]
    fn test_expired_entry_is_absent_and_removed() {
        let cache = ResponseCache::new(10);
        let now = Instant::now();
        cache.set_at("k", response("payload"), Duration::from_secs(60), now);

        assert!(cache.get_at("k", now + Duration::from_secs(61)).is_none());
        // Lazy removal happened on the lookup.
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_capacity_evicts_oldest_created() {
        let cache = ResponseCache::new(2);
        let now = Instant::now();
        cache.set_at("old", response("1"), Duration::from_secs(60), now);
        cache.set_at(
            "mid",
            response("2"),
            Duration::from_secs(60),
            now + Duration::from_secs(1),
        );
        cache.set_at(
            "new",
            response("3"),
            Duration::from_secs(60),
            now + Duration::from_secs(2),
        );

        let probe = now + Duration::from_secs(3);
        assert!(cache.get_at("old", probe).is_none());
        assert!(cache.get_at("mid", probe).is_some());
        assert!(cache.get_at("new", probe).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let cache = ResponseCache::new(2);
        let now = Instant::now();
        cache.set_at("a", response("1"), Duration::from_secs(60), now);
        cache.set_at("b", response("2"), Duration::from_secs(60), now);
        cache.set_at(
            "a",
            response("updated"),
            Duration::from_secs(60),
            now + Duration::from_secs(1),
        );

        let probe = now + Duration::from_secs(2);
        assert_eq!(
            cache.get_at("a", probe).unwrap().body.as_ref(),
            b"updated"
        );
        assert!(cache.get_at("b", probe).is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let cache = ResponseCache::new(2);
        cache.set("k", response("1"), Duration::ZERO);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = ResponseCache::new(2);
        let now = Instant::now();
        cache.set_at("k", response("1"), Duration::from_secs(60), now);

        cache.get_at("k", now);
        cache.get_at("k", now);
        cache.get_at("missing", now);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }
}
