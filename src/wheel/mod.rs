//! Timing Wheel Module
//!
//! Schedules one-shot callbacks on a ring of slots advanced by a periodic
//! tick, with O(1) arm, move and cancel.

mod ring;
mod timing_wheel;

pub use timing_wheel::{Execute, TimingWheel, DRAIN_WORKERS};
