//! Wheel Cache - An in-process TTL cache driven by a timing wheel
//!
//! Provides per-key expiry through a hashed timing wheel, optional LRU
//! bounding, single-flight loading and a retrying cleanup helper.

pub mod cache;
pub mod config;
pub mod error;
pub mod jitter;
pub mod sync;
pub mod tasks;
pub mod threading;
pub mod wheel;

pub use cache::{Cache, CacheBuilder, CacheStats};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use sync::SharedCalls;
pub use tasks::CacheCleaner;
pub use wheel::TimingWheel;
