//! Shared counter store contract.
//!
//! The limiter only needs three single-key atomic primitives from the store:
//! `INCR`, `EXPIRE` and `TTL`. Any key/value service with single-key
//! atomicity satisfies it.

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot currently be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A round-trip did not complete in time
    #[error("store round-trip timed out")]
    Timeout,

    /// Redis protocol or connection errors
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remaining lifetime of a counter record, as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Seconds until the record expires
    Expires(u64),
    /// The record exists but has no expiry
    NoExpiry,
    /// The record does not exist
    Missing,
}

impl Ttl {
    /// Interpret a raw Redis `TTL` reply (`-1` no expiry, `-2` missing key).
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -2 => Ttl::Missing,
            n if n < 0 => Ttl::NoExpiry,
            n => Ttl::Expires(n as u64),
        }
    }

    /// Seconds remaining, falling back to `window_secs` when the record has
    /// no expiry or vanished between the increment and the TTL query.
    pub fn seconds_or(self, window_secs: u64) -> u64 {
        match self {
            Ttl::Expires(secs) => secs,
            Ttl::NoExpiry | Ttl::Missing => window_secs,
        }
    }
}

/// Result of counting one hit against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Post-increment counter value
    pub count: u64,
    /// Remaining lifetime of the record after the increment
    pub ttl: Ttl,
}

/// A shared store of windowed counters.
///
/// Implementations must be safe to call concurrently from many requests;
/// every primitive is a single-key atomic operation.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at 1 if absent.
    async fn incr(&self, key: &str) -> StoreResult<u64>;

    /// Set the expiry of `key`. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> StoreResult<Ttl>;

    /// Count one hit: increment, start the window if this hit created the
    /// record, then report the remaining lifetime.
    ///
    /// A record found without an expiry (its first `EXPIRE` was lost) gets
    /// the window again, so it cannot stay pinned over the limit.
    /// Stores that can run these steps as one server-side operation should
    /// override this.
    async fn hit(&self, key: &str, window_secs: u64) -> StoreResult<Hit> {
        let count = self.incr(key).await?;
        if count == 1 {
            self.expire(key, window_secs).await?;
        }
        let mut ttl = self.ttl(key).await?;
        if ttl == Ttl::NoExpiry && self.expire(key, window_secs).await? {
            ttl = Ttl::Expires(window_secs);
        }
        Ok(Hit { count, ttl })
    }

    /// Short human-readable name used in logs and health output.
    fn name(&self) -> &'static str;
}
