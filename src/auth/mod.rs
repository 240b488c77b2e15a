//! # Authentication Module
//!
//! Validates inbound requests against a route's declared auth requirement.
//! One credential store backs every scheme: the consumer table. An API key
//! arrives in `X-API-Key`, a bearer token presents the same key via
//! `Authorization: Bearer <key>`, and basic auth carries
//! `base64(name:key)`.
//!
//! The registry is administratively owned; request handling never mutates a
//! consumer except for the `last_used` touch on successful authentication.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{AuthContext, Consumer, IncomingRequest};
use crate::routing::{AuthRequirement, Route};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Header carrying an API key credential
pub const API_KEY_HEADER: &str = "x-api-key";

/// Consumer table with API-key uniqueness enforced at registration
#[derive(Default)]
pub struct ConsumerRegistry {
    by_id: DashMap<String, Consumer>,
    // api_key -> consumer id
    key_index: DashMap<String, String>,
}

impl ConsumerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            key_index: DashMap::new(),
        }
    }

    /// Register a consumer
    ///
    /// Rejects a duplicate API key or duplicate id synchronously; neither
    /// ever surfaces mid-request.
    pub fn register(&self, consumer: Consumer) -> GatewayResult<()> {
        if consumer.api_key.is_empty() {
            return Err(GatewayError::config(format!(
                "consumer {} has an empty API key",
                consumer.name
            )));
        }
        if self.key_index.contains_key(&consumer.api_key) {
            return Err(GatewayError::config(format!(
                "duplicate consumer API key for {}",
                consumer.name
            )));
        }
        if self.by_id.contains_key(&consumer.id) {
            return Err(GatewayError::config(format!(
                "duplicate consumer id: {}",
                consumer.id
            )));
        }
        self.key_index
            .insert(consumer.api_key.clone(), consumer.id.clone());
        self.by_id.insert(consumer.id.clone(), consumer);
        Ok(())
    }

    /// Remove a consumer by id
    pub fn remove(&self, id: &str) -> Option<Consumer> {
        let (_, consumer) = self.by_id.remove(id)?;
        self.key_index.remove(&consumer.api_key);
        Some(consumer)
    }

    /// Look up a consumer by id
    pub fn get(&self, id: &str) -> Option<Consumer> {
        self.by_id.get(id).map(|entry| entry.clone())
    }

    /// Look up a consumer by API key
    pub fn by_api_key(&self, api_key: &str) -> Option<Consumer> {
        let id = self.key_index.get(api_key)?;
        self.by_id.get(id.value()).map(|entry| entry.clone())
    }

    /// All registered consumers
    pub fn list(&self) -> Vec<Consumer> {
        self.by_id.iter().map(|entry| entry.clone()).collect()
    }

    /// Record a successful authentication for the consumer
    fn touch(&self, id: &str) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.last_used = Some(chrono::Utc::now());
        }
    }
}

/// Validates requests against route auth requirements
pub struct AuthManager {
    consumers: Arc<ConsumerRegistry>,
}

impl AuthManager {
    /// Create a manager over the shared consumer registry
    pub fn new(consumers: Arc<ConsumerRegistry>) -> Self {
        Self { consumers }
    }

    /// Authenticate a request for the given route
    ///
    /// Returns `Ok(None)` for routes requiring no auth, `Ok(Some(context))`
    /// on success, `Unauthorized` for a missing or invalid credential, and
    /// `Forbidden` when the authenticated consumer's allow-list excludes the
    /// route.
    pub fn authenticate(
        &self,
        request: &IncomingRequest,
        route: &Route,
    ) -> GatewayResult<Option<AuthContext>> {
        let (consumer, method) = match route.auth {
            AuthRequirement::None => return Ok(None),
            AuthRequirement::ApiKey => (self.check_api_key(request)?, "api_key"),
            AuthRequirement::Bearer => (self.check_bearer(request)?, "bearer"),
            AuthRequirement::Basic => (self.check_basic(request)?, "basic"),
        };

        if !consumer.may_use_route(&route.id) {
            return Err(GatewayError::forbidden(format!(
                "consumer {} is not allowed on route {}",
                consumer.name, route.id
            )));
        }

        self.consumers.touch(&consumer.id);
        debug!(
            consumer = %consumer.name,
            route_id = %route.id,
            auth_method = method,
            "request authenticated"
        );

        Ok(Some(AuthContext {
            consumer_id: consumer.id,
            consumer_name: consumer.name,
            auth_method: method.to_string(),
            rate_limit: consumer.rate_limit,
        }))
    }

    fn check_api_key(&self, request: &IncomingRequest) -> GatewayResult<Consumer> {
        let key = request
            .header(API_KEY_HEADER)
            .ok_or_else(|| GatewayError::unauthorized("missing X-API-Key header"))?;
        self.consumers
            .by_api_key(key)
            .ok_or_else(|| GatewayError::unauthorized("unknown API key"))
    }

    fn check_bearer(&self, request: &IncomingRequest) -> GatewayResult<Consumer> {
        let header = request
            .header("authorization")
            .ok_or_else(|| GatewayError::unauthorized("missing Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| GatewayError::unauthorized("expected a bearer token"))?;
        self.consumers
            .by_api_key(token.trim())
            .ok_or_else(|| GatewayError::unauthorized("invalid bearer token"))
    }

    fn check_basic(&self, request: &IncomingRequest) -> GatewayResult<Consumer> {
        let header = request
            .header("authorization")
            .ok_or_else(|| GatewayError::unauthorized("missing Authorization header"))?;
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| GatewayError::unauthorized("expected basic credentials"))?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| GatewayError::unauthorized("malformed basic credentials"))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| GatewayError::unauthorized("malformed basic credentials"))?;
        let (name, key) = decoded
            .split_once(':')
            .ok_or_else(|| GatewayError::unauthorized("malformed basic credentials"))?;

        let consumer = self
            .consumers
            .by_api_key(key)
            .filter(|consumer| consumer.name == name)
            .ok_or_else(|| GatewayError::unauthorized("invalid basic credentials"))?;
        Ok(consumer)
    }
}
