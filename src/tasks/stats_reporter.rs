//! Stats Reporter Task
//!
//! Background task that periodically logs a cache's counters.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStats;

/// Spawns a background task that logs a stats snapshot every `interval`.
///
/// The task sleeps for `interval` between reports and exits once `snapshot`
/// returns `None`, which the cache uses to signal it has been dropped.
///
/// # Arguments
/// * `interval` - Time between two reports
/// * `snapshot` - Produces the stats to log, or `None` to stop
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort it early.
pub fn spawn_stats_reporter<F>(interval: Duration, snapshot: F) -> JoinHandle<()>
where
    F: Fn() -> Option<CacheStats> + Send + 'static,
{
    tokio::spawn(async move {
        debug!(?interval, "starting stats reporter");

        loop {
            tokio::time::sleep(interval).await;

            let Some(stats) = snapshot() else {
                debug!("cache dropped, stopping stats reporter");
                break;
            };

            info!(
                cache = %stats.name,
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                entries = stats.total_entries,
                hit_rate = stats.hit_rate(),
                "cache stats"
            );
        }
    })
}
