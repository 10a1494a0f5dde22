//! Configuration Module
//!
//! Loads cache settings from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::jitter::DEFAULT_DEVIATION;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expiry applied by `set`, `take` and `refresh`, in seconds
    pub expire_secs: u64,
    /// Maximum number of keys; 0 means unbounded
    pub limit: usize,
    /// Duration of one timing-wheel tick, in milliseconds
    pub wheel_interval_ms: u64,
    /// Number of slots in one wheel revolution
    pub wheel_slots: usize,
    /// Relative spread applied to every expiry
    pub jitter_deviation: f64,
    /// Period of the stats log line, in seconds; 0 disables it
    pub stats_interval_secs: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_EXPIRE_SECS` - Default expiry (default: 1800)
    /// - `CACHE_LIMIT` - Maximum keys, 0 for no bound (default: 0)
    /// - `CACHE_WHEEL_INTERVAL_MS` - Wheel tick (default: 1000)
    /// - `CACHE_WHEEL_SLOTS` - Wheel slots (default: 300)
    /// - `CACHE_JITTER_DEVIATION` - Expiry jitter (default: 0.01)
    /// - `CACHE_STATS_INTERVAL_SECS` - Stats report period (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            expire_secs: env_or("CACHE_EXPIRE_SECS", defaults.expire_secs),
            limit: env_or("CACHE_LIMIT", defaults.limit),
            wheel_interval_ms: env_or("CACHE_WHEEL_INTERVAL_MS", defaults.wheel_interval_ms),
            wheel_slots: env_or("CACHE_WHEEL_SLOTS", defaults.wheel_slots),
            jitter_deviation: env_or("CACHE_JITTER_DEVIATION", defaults.jitter_deviation),
            stats_interval_secs: env_or(
                "CACHE_STATS_INTERVAL_SECS",
                defaults.stats_interval_secs,
            ),
        }
    }

    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.expire_secs)
    }

    pub fn wheel_interval(&self) -> Duration {
        Duration::from_millis(self.wheel_interval_ms)
    }

    /// `None` when reporting is disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_secs: 30 * 60,
            limit: 0,
            wheel_interval_ms: 1000,
            wheel_slots: 300,
            jitter_deviation: DEFAULT_DEVIATION,
            stats_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.expire(), Duration::from_secs(1800));
        assert_eq!(config.limit, 0);
        assert_eq!(config.wheel_interval(), Duration::from_secs(1));
        assert_eq!(config.wheel_slots, 300);
        assert_eq!(config.jitter_deviation, 0.01);
        assert_eq!(config.stats_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("CACHE_LIMIT", "250");
        env::set_var("CACHE_WHEEL_SLOTS", "not-a-number");
        env::set_var("CACHE_STATS_INTERVAL_SECS", "0");

        let config = CacheConfig::from_env();
        assert_eq!(config.limit, 250);
        // unparsable values fall back to the default
        assert_eq!(config.wheel_slots, 300);
        assert_eq!(config.stats_interval(), None);

        env::remove_var("CACHE_LIMIT");
        env::remove_var("CACHE_WHEEL_SLOTS");
        env::remove_var("CACHE_STATS_INTERVAL_SECS");
    }
}
