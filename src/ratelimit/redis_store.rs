//! Redis-backed counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::OnceCell;
use tracing::info;

use super::store::{CounterStore, Hit, StoreError, StoreResult, Ttl};

/// Increment, (re)start the window when the record has no expiry, and
/// report the TTL in a single server-side step.
const HIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('TTL', KEYS[1])
if count == 1 or ttl == -1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Counter store backed by a Redis server.
///
/// The connection is opened on first use and retried on every operation
/// until it succeeds, so a server that is down at startup starts counting
/// as soon as it comes up. Once established, the connection manager
/// multiplexes all requests over one connection and reconnects on its own.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    connect_timeout: Duration,
    hit_script: Script,
}

impl RedisStore {
    /// Create a store for the Redis server at `url` without connecting.
    ///
    /// Supports both redis:// and rediss:// URLs. Fails only if the URL
    /// cannot be parsed.
    pub fn new(url: &str, connect_timeout: Duration) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            connect_timeout,
            hit_script: Script::new(HIT_SCRIPT),
        })
    }

    /// Create a store and try to connect once, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> StoreResult<Self> {
        let store = Self::new(url, timeout)?;
        store.connection().await?;
        Ok(store)
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    /// The shared connection, opening it if no attempt has succeeded yet.
    pub async fn connection(&self) -> StoreResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| StoreError::Timeout)?
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

                info!("Connected to Redis counter store");
                Ok::<_, StoreError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count.max(0) as u64)
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let applied: bool = conn.expire(key, seconds as i64).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Ttl> {
        let mut conn = self.connection().await?;
        let raw: i64 = conn.ttl(key).await?;
        Ok(Ttl::from_raw(raw))
    }

    async fn hit(&self, key: &str, window_secs: u64) -> StoreResult<Hit> {
        let mut conn = self.connection().await?;
        let (count, ttl): (i64, i64) = self
            .hit_script
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;

        Ok(Hit {
            count: count.max(0) as u64,
            ttl: Ttl::from_raw(ttl),
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
