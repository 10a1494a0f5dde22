//! Background Tasks Module
//!
//! Contains background tasks that run alongside a cache.
//!
//! # Tasks
//! - Stats reporting: Logs cache counters at a configured interval
//! - Cache cleaning: Retries failed cleanup work with growing backoff

mod cleaner;
mod stats_reporter;

pub use cleaner::CacheCleaner;
pub use stats_reporter::spawn_stats_reporter;
