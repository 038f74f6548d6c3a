//! # Engine Module
//!
//! This module implements the anytime bound engine of SHARK++: provable lower and upper bounds
//! on the partition function of one sequence, tightened on demand and shared between sequences.
//!
//! ## Overview
//!
//! A single bound tree per state holds every partial assignment explored so far. Each sequence
//! that is asked about gets its own bound over the nodes of that tree, and tightening one
//! sequence leaves expanded nodes, minimized leaves and energy corrections behind for every
//! other sequence.
//!
//! ## Architecture
//!
//! - **Bound Tree** ([`tree`]) - Node arena, node scorers and the branch site order
//! - **Sequence Bounds** ([`bound`]) - Per-sequence queues, aggregate bound, status and statistics
//! - **Multi-Sequence Bound** ([`multi`]) - Owns the tree, the executors and the bounds cache
//! - **Precompute** ([`precompute`]) - Solving the immutable sites once and grafting the result
//! - **Corrections** ([`correction`]) - Tuple energy corrections layered over the lower table
//! - **Executor** ([`executor`]) - Worker pool with a single listener thread
//! - **Remote Lookup** ([`remote`]) - Shared table with bounded waiting
//! - **Configuration** ([`config`]) and **Error Handling** ([`error`])
//!
//! ## Key Capabilities
//!
//! - **Anytime bounds** that stay sound after every phase and only get tighter
//! - **Work sharing** across sequences through one tree and per-sequence remainder bounds
//! - **Energy corrections** discovered from minimized leaves and applied to queued nodes
//! - **Concurrent scoring and minimization** with a deterministic fold on the calling thread
//! - **Progress monitoring** through node-level and phase-level events

pub mod bound;
pub mod config;
pub mod correction;
pub mod error;
pub mod executor;
pub mod multi;
pub(crate) mod phases;
pub(crate) mod pool;
pub mod precompute;
pub mod progress;
pub(crate) mod queue;
pub mod remote;
pub(crate) mod tasks;
pub mod tree;
