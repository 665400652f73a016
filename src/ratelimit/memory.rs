//! In-process counter store.
//!
//! Records live in a sharded map; each operation holds the shard lock of a
//! single key only, which gives the same single-key atomicity Redis does.
//! Expired records are treated as absent and reclaimed lazily or by
//! [`MemoryStore::purge_expired`]. Uses `tokio::time::Instant` so tests can
//! drive window expiry with a paused clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::store::{CounterStore, StoreError, StoreResult, Ttl};

#[derive(Debug, Default, Clone, Copy)]
struct Record {
    count: u64,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A counter store kept in process memory.
///
/// Only meaningful for a single instance; several processes sharing a quota
/// need an external store such as Redis.
pub struct MemoryStore {
    records: DashMap<String, Record>,
    available: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            available: AtomicBool::new(true),
            latency: None,
        }
    }

    /// Create a store that waits `latency` before answering each operation.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Mark the store reachable or unreachable. While unreachable every
    /// operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current value of `key`, if it exists and has not expired.
    pub fn get_count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.records
            .get(key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.count)
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            trace!(removed, "Purged expired counter records");
        }
        removed
    }

    /// Number of records held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn round_trip(&self) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> StoreResult<u64> {
        self.round_trip().await?;
        let now = Instant::now();

        let mut record = self.records.entry(key.to_owned()).or_default();
        if record.is_expired(now) {
            *record = Record::default();
        }
        record.count += 1;
        Ok(record.count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        self.round_trip().await?;
        let now = Instant::now();

        match self.records.get_mut(key) {
            Some(mut record) if !record.is_expired(now) => {
                record.expires_at = Some(now + Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Ttl> {
        self.round_trip().await?;
        let now = Instant::now();

        let ttl = match self.records.get(key) {
            None => Ttl::Missing,
            Some(record) if record.is_expired(now) => Ttl::Missing,
            Some(record) => match record.expires_at {
                None => Ttl::NoExpiry,
                Some(at) => {
                    // Round up so an unexpired record never reports zero.
                    let millis = at.duration_since(now).as_millis() as u64;
                    Ttl::Expires(millis.div_ceil(1000))
                }
            },
        };
        Ok(ttl)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
