//! HTTP front end: router, rate limiting middleware and server.

mod middleware;
mod response;
mod routes;
mod server;

pub use response::{
    insert_quota_headers, ApiError, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{PostguardConfig, StoreConfig};
use crate::error::{PostguardError, Result};
use crate::messages::MessageBoard;
use crate::ratelimit::{CounterStore, IdentityResolver, MemoryStore, RateLimiter, RedisStore};

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub messages: Arc<MessageBoard>,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, messages: Arc<MessageBoard>) -> Self {
        Self { limiter, messages }
    }

    /// Build the store, limiter and message board described by `config`.
    ///
    /// A Redis server that cannot be reached at startup does not stop the
    /// service: requests fail open until the store connects.
    pub async fn from_config(config: &PostguardConfig) -> Result<Self> {
        let store = connect_store(&config.store, config.rate_limiting.store_timeout()).await?;
        let limiter = RateLimiter::new(
            config.rate_limiting.clone(),
            IdentityResolver::new(&config.auth),
            store,
        );
        Ok(Self::new(Arc::new(limiter), Arc::new(MessageBoard::new())))
    }
}

/// Create the counter store selected by `config`, if any.
///
/// A configured Redis store is always returned; its connection is retried
/// on demand. Only an unparsable URL is an error.
pub async fn connect_store(
    config: &StoreConfig,
    timeout: Duration,
) -> Result<Option<Arc<dyn CounterStore>>> {
    if let Some(url) = config.redis_url.as_deref() {
        let store = RedisStore::new(url, timeout)
            .map_err(|e| PostguardError::Config(format!("store.redis_url: {}", e)))?;
        if let Err(e) = store.connection().await {
            warn!(error = %e, "Redis unavailable, failing open until it connects");
        }
        let store: Arc<dyn CounterStore> = Arc::new(store);
        return Ok(Some(store));
    }

    if config.in_memory {
        let store = Arc::new(MemoryStore::new());
        spawn_purger(
            Arc::downgrade(&store),
            Duration::from_secs(config.purge_interval_secs),
        );
        info!("Using in-process counter store");
        let store: Arc<dyn CounterStore> = store;
        return Ok(Some(store));
    }

    warn!("No counter store configured, rate limiting disabled");
    Ok(None)
}

/// Periodically reclaim expired records until the store is dropped.
fn spawn_purger(store: std::sync::Weak<MemoryStore>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            store.purge_expired();
        }
    });
}

/// Create the application router with the rate limiter in front of every route.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health))
        .route("/messages", post(routes::create_message))
        .route("/messages/:session_id", get(routes::list_messages))
        // Order matters: the last layer added runs first.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Outcome, RequestInfo};
    use axum::http::HeaderMap;
    use std::net::SocketAddr;

    fn config_with_redis(url: &str) -> PostguardConfig {
        let mut config = PostguardConfig::default();
        config.store.redis_url = Some(url.to_string());
        config
    }

    #[tokio::test]
    async fn test_unreachable_redis_keeps_store_and_fails_open() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = config_with_redis(&format!("redis://127.0.0.1:{}/0", port));
        let state = AppState::from_config(&config).await.unwrap();
        assert_eq!(state.limiter.store_name(), Some("redis"));

        let headers = HeaderMap::new();
        let request = RequestInfo {
            path: "/messages",
            headers: &headers,
            remote_addr: Some(SocketAddr::from(([127, 0, 0, 1], 40000))),
        };
        for _ in 0..3 {
            assert_eq!(state.limiter.check(&request).await, Outcome::Bypassed);
        }
    }

    #[tokio::test]
    async fn test_unparsable_redis_url_is_a_config_error() {
        let config = config_with_redis("not-a-redis-url");
        let err = AppState::from_config(&config).await.err().unwrap();
        assert!(matches!(err, PostguardError::Config(_)));
    }

    #[tokio::test]
    async fn test_store_selection() {
        let state = AppState::from_config(&PostguardConfig::default()).await.unwrap();
        assert_eq!(state.limiter.store_name(), None);

        let mut config = PostguardConfig::default();
        config.store.in_memory = true;
        let state = AppState::from_config(&config).await.unwrap();
        assert_eq!(state.limiter.store_name(), Some("memory"));
    }
}
