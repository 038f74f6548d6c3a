//! # SHARK++ Core Library
//!
//! Anytime, provably bounded partition function estimation over discrete conformation spaces,
//! and a best-first multi-sequence design search built on top of it.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same three-layer split throughout:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ConfSpace`, `Sequence`, `Assignment`),
//!   the log-space `Weight` numeric type, energy tables, the `CostOracle` seam, and problem I/O.
//!
//! - **[`engine`]: The Logic Core.** The stateful bound machinery: the node arena (`BoundTree`),
//!   scorers, the correction matrix, per-sequence queues, the phase engine that tightens a bound,
//!   and the task executor that runs scoring and minimization work off the calling thread.
//!
//! - **[`workflows`]: The Public API.** The best-first sequence search that ranks sequences by a
//!   bound on their binding score and streams the top results to a `ScoreWriter`.

pub mod core;
pub mod engine;
pub mod workflows;
