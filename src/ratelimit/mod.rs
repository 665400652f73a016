//! Rate limiting logic and the shared counter store seam.

mod identity;
mod limiter;
mod memory;
mod redis_store;
mod store;

pub use identity::{ClientKey, IdentityResolver, RequestInfo, FORWARDED_FOR};
pub use limiter::{Outcome, RateLimiter};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{CounterStore, Hit, StoreError, StoreResult, Ttl};
