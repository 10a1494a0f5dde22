//! Jitter Module
//!
//! Randomly perturbs durations around a nominal value so that keys written
//! together do not all expire on the same tick.

use std::time::Duration;

/// Deviation used by the cache when none is configured.
pub const DEFAULT_DEVIATION: f64 = 0.01;

// == Jitter ==
/// Produces values uniformly spread over `[base * (1 - d), base * (1 + d)]`.
#[derive(Debug, Clone, Copy)]
pub struct Jitter {
    deviation: f64,
}

impl Jitter {
    // == Constructor ==
    /// Creates a jitter source. The deviation is clamped to `[0, 1]`.
    pub fn new(deviation: f64) -> Self {
        let deviation = if deviation.is_nan() {
            0.0
        } else {
            deviation.clamp(0.0, 1.0)
        };
        Self { deviation }
    }

    /// Returns the configured deviation.
    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    fn factor(&self) -> f64 {
        1.0 + self.deviation - 2.0 * self.deviation * fastrand::f64()
    }

    // == Around Duration ==
    /// Returns a random duration around `base`.
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn around_duration(&self, base: Duration) -> Duration {
        Duration::try_from_secs_f64(base.as_secs_f64() * self.factor()).unwrap_or(Duration::MAX)
    }

    // == Around Int ==
    /// Returns a random integer around `base`.
    pub fn around_int(&self, base: i64) -> i64 {
        (base as f64 * self.factor()) as i64
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new(DEFAULT_DEVIATION)
    }
}
