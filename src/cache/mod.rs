//! Cache Module
//!
//! Provides in-memory caching with timing-wheel expiration, LRU eviction and
//! coalesced loading.

mod lru;
mod stats;
mod store;


// Re-export public types
pub use lru::{EvictionPolicy, KeyLru, NoLru};
pub use stats::CacheStats;
pub use store::{Cache, CacheBuilder};
