//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache, the timing wheel and the cleaner.
///
/// The type is `Clone` because a single outcome of a coalesced load is handed
/// to every caller that joined it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The timing wheel was stopped; it cannot be restarted
    #[error("timing wheel is closed")]
    Closed,

    /// Invalid delay, interval or slot count
    #[error("incorrect task argument: {0}")]
    Argument(String),

    /// A caller-supplied fetch failed
    #[error("fetch failed: {0}")]
    Fetch(Arc<anyhow::Error>),
}

impl CacheError {
    // == Fetch Error Access ==
    /// Returns the original fetch error, if this is a fetch failure.
    pub fn fetch_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        CacheError::Fetch(Arc::new(err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
