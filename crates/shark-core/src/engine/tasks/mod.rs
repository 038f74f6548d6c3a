//! Worker-side units of the bound engine.
//!
//! Tasks run on the executors' worker threads. They receive owned snapshots and shared read-only
//! scoring context, and return their results to the listener thread; the tree itself is only
//! modified on the thread driving the phase loop.

pub mod energy_correction;
pub mod scoring;
