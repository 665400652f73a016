//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::identity::{ClientKey, IdentityResolver, RequestInfo};
use super::store::{CounterStore, Hit};
use crate::config::RateLimitingConfig;

/// The decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Within quota; forward and report the remaining quota
    Allowed {
        /// Requests left in the current window
        remaining: u64,
        /// Seconds until the window resets
        reset_secs: u64,
    },
    /// Over quota; answer with 429
    Rejected {
        /// Seconds until the client may retry
        retry_after_secs: u64,
    },
    /// Not counted; forward untouched
    Bypassed,
}

/// Fixed-window rate limiter over a shared counter store.
///
/// The limiter holds only immutable state and keeps no local counts, so any
/// number of instances (and concurrent requests) can share one store. Store
/// failures and timeouts fail open.
pub struct RateLimiter {
    config: RateLimitingConfig,
    resolver: IdentityResolver,
    store: Option<Arc<dyn CounterStore>>,
}

impl RateLimiter {
    /// Create a limiter. With no store every request is bypassed.
    pub fn new(
        config: RateLimitingConfig,
        resolver: IdentityResolver,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Self {
        Self {
            config,
            resolver,
            store,
        }
    }

    /// The limiter's configuration.
    pub fn config(&self) -> &RateLimitingConfig {
        &self.config
    }

    /// Name of the configured store, if any.
    pub fn store_name(&self) -> Option<&'static str> {
        self.store.as_ref().map(|s| s.name())
    }

    /// Store key holding the counter of `client`.
    pub fn store_key(&self, client: &ClientKey) -> String {
        format!("{}:{}", self.config.key_prefix, client)
    }

    /// Count `request` against its client's quota and decide its fate.
    ///
    /// Every call counts as one request; there is no deduplication.
    pub async fn check(&self, request: &RequestInfo<'_>) -> Outcome {
        if self.config.is_exempt(request.path) {
            trace!(path = %request.path, "Path exempt from rate limiting");
            return Outcome::Bypassed;
        }

        let Some(store) = self.store.as_ref() else {
            return Outcome::Bypassed;
        };

        let client = self.resolver.resolve(request);
        let store_key = self.store_key(&client);

        let Some(hit) = self.hit(store.as_ref(), &store_key).await else {
            return Outcome::Bypassed;
        };

        let window = self.config.window_secs;
        let limit = self.config.limit;
        let ttl = hit.ttl.seconds_or(window);

        trace!(
            key = %store_key,
            count = hit.count,
            ttl = ttl,
            "Checked rate limit"
        );

        if hit.count > limit {
            debug!(
                key = %store_key,
                count = hit.count,
                limit = limit,
                "Rate limit exceeded"
            );
            return Outcome::Rejected {
                retry_after_secs: if ttl > 0 { ttl } else { window },
            };
        }

        Outcome::Allowed {
            remaining: limit.saturating_sub(hit.count),
            reset_secs: ttl,
        }
    }

    /// One bounded store round-trip. `None` means the store could not
    /// answer and the request should pass uncounted.
    async fn hit(&self, store: &dyn CounterStore, key: &str) -> Option<Hit> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, store.hit(key, self.config.window_secs)).await {
            Ok(Ok(hit)) => Some(hit),
            Ok(Err(e)) => {
                warn!(
                    store = store.name(),
                    key = %key,
                    error = %e,
                    "Counter store failed, allowing request"
                );
                None
            }
            Err(_) => {
                warn!(
                    store = store.name(),
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Counter store timed out, allowing request"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::ratelimit::store::{StoreResult, Ttl};
    use crate::ratelimit::MemoryStore;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, HeaderValue};
    use std::net::SocketAddr;
    use std::time::Duration;

    fn test_config(limit: u64, window_secs: u64) -> RateLimitingConfig {
        RateLimitingConfig {
            limit,
            window_secs,
            ..RateLimitingConfig::default()
        }
    }

    fn limiter_with(config: RateLimitingConfig, store: Arc<dyn CounterStore>) -> RateLimiter {
        RateLimiter::new(config, IdentityResolver::new(&AuthConfig::default()), Some(store))
    }

    fn headers_from(forwarded_for: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(forwarded_for).unwrap());
        headers
    }

    fn request<'a>(path: &'a str, headers: &'a HeaderMap) -> RequestInfo<'a> {
        RequestInfo {
            path,
            headers,
            remote_addr: Some(SocketAddr::from(([127, 0, 0, 1], 40000))),
        }
    }

    /// Store whose `EXPIRE` never applies, as when a TTL-set is lost.
    struct NoExpiryStore(MemoryStore);

    #[async_trait]
    impl CounterStore for NoExpiryStore {
        async fn incr(&self, key: &str) -> StoreResult<u64> {
            self.0.incr(key).await
        }

        async fn expire(&self, _key: &str, _seconds: u64) -> StoreResult<bool> {
            Ok(false)
        }

        async fn ttl(&self, key: &str) -> StoreResult<Ttl> {
            self.0.ttl(key).await
        }

        fn name(&self) -> &'static str {
            "no-expiry"
        }
    }

    #[tokio::test]
    async fn test_limit_sequence() {
        let limiter = limiter_with(test_config(5, 60), Arc::new(MemoryStore::new()));
        let headers = headers_from("10.0.0.5");

        for expected_remaining in [4, 3, 2, 1, 0] {
            match limiter.check(&request("/messages", &headers)).await {
                Outcome::Allowed { remaining, reset_secs } => {
                    assert_eq!(remaining, expected_remaining);
                    assert!(reset_secs > 0 && reset_secs <= 60);
                }
                other => panic!("expected Allowed, got {:?}", other),
            }
        }

        match limiter.check(&request("/messages", &headers)).await {
            Outcome::Rejected { retry_after_secs } => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let limiter = limiter_with(test_config(2, 60), Arc::new(MemoryStore::new()));
        let a = headers_from("10.0.0.1");
        let b = headers_from("10.0.0.2");

        for _ in 0..3 {
            limiter.check(&request("/messages", &a)).await;
        }
        assert!(matches!(
            limiter.check(&request("/messages", &a)).await,
            Outcome::Rejected { .. }
        ));
        assert_eq!(
            limiter.check(&request("/messages", &b)).await,
            Outcome::Allowed { remaining: 1, reset_secs: 60 }
        );
    }

    #[tokio::test]
    async fn test_exempt_path_always_bypassed() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(test_config(1, 60), store.clone());
        let headers = headers_from("10.0.0.5");

        for _ in 0..3 {
            limiter.check(&request("/messages", &headers)).await;
        }
        for _ in 0..5 {
            assert_eq!(
                limiter.check(&request("/healthz", &headers)).await,
                Outcome::Bypassed
            );
        }
        assert_eq!(store.get_count("rl:10.0.0.5"), Some(3));
    }

    #[tokio::test]
    async fn test_no_store_bypasses() {
        let limiter = RateLimiter::new(
            test_config(1, 60),
            IdentityResolver::new(&AuthConfig::default()),
            None,
        );
        let headers = headers_from("10.0.0.5");

        for _ in 0..3 {
            assert_eq!(
                limiter.check(&request("/messages", &headers)).await,
                Outcome::Bypassed
            );
        }
        assert_eq!(limiter.store_name(), None);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_open() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(test_config(1, 60), store.clone());
        let headers = headers_from("10.0.0.5");

        limiter.check(&request("/messages", &headers)).await;
        assert!(matches!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Rejected { .. }
        ));

        store.set_available(false);
        for _ in 0..3 {
            assert_eq!(
                limiter.check(&request("/messages", &headers)).await,
                Outcome::Bypassed
            );
        }

        store.set_available(true);
        assert!(matches!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Rejected { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_open() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_secs(1)));
        let config = RateLimitingConfig {
            store_timeout_ms: 250,
            ..test_config(1, 60)
        };
        let limiter = limiter_with(config, store);
        let headers = headers_from("10.0.0.5");

        assert_eq!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Bypassed
        );
    }

    #[tokio::test]
    async fn test_each_call_counts_once() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(test_config(10, 60), store.clone());
        let headers = headers_from("10.0.0.5");
        let req = request("/messages", &headers);

        limiter.check(&req).await;
        assert_eq!(store.get_count("rl:10.0.0.5"), Some(1));
        limiter.check(&req).await;
        assert_eq!(store.get_count("rl:10.0.0.5"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_restores_quota() {
        let limiter = limiter_with(test_config(1, 10), Arc::new(MemoryStore::new()));
        let headers = headers_from("10.0.0.5");

        limiter.check(&request("/messages", &headers)).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Rejected { retry_after_secs: 7 }
        );

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Allowed { remaining: 0, reset_secs: 10 }
        );
    }

    #[tokio::test]
    async fn test_missing_ttl_reports_window() {
        let limiter = limiter_with(test_config(1, 30), Arc::new(NoExpiryStore(MemoryStore::new())));
        let headers = headers_from("10.0.0.5");

        assert_eq!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Allowed { remaining: 0, reset_secs: 30 }
        );
        assert_eq!(
            limiter.check(&request("/messages", &headers)).await,
            Outcome::Rejected { retry_after_secs: 30 }
        );
    }

    #[tokio::test]
    async fn test_custom_key_prefix() {
        let store = Arc::new(MemoryStore::new());
        let config = RateLimitingConfig {
            key_prefix: "api".to_string(),
            ..test_config(5, 60)
        };
        let limiter = limiter_with(config, store.clone());
        let headers = headers_from("10.0.0.5");

        limiter.check(&request("/messages", &headers)).await;
        assert_eq!(store.get_count("api:10.0.0.5"), Some(1));
        assert_eq!(store.get_count("rl:10.0.0.5"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_respect_limit() {
        let limiter = Arc::new(limiter_with(test_config(10, 60), Arc::new(MemoryStore::new())));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let headers = headers_from("10.0.0.9");
                    limiter.check(&request("/messages", &headers)).await
                })
            })
            .collect();

        let outcomes = futures::future::join_all(tasks).await;
        let allowed = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(Outcome::Allowed { .. })))
            .count();
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(Outcome::Rejected { .. })))
            .count();

        assert_eq!(allowed, 10);
        assert_eq!(rejected, 40);
    }
}
