//! Synchronization primitives.

mod shared_calls;

pub use shared_calls::SharedCalls;
