//! # Workflows Module
//!
//! This module provides the high-level entry points of the library, combining the bound engine
//! of each state into a complete design procedure.
//!
//! ## Overview
//!
//! A design problem has three states (protein, ligand and complex) over related conformation
//! spaces. The design workflow searches the sequence space of the complex best-first and ranks
//! complete sequences by an interval on their binding score, refining only the sequences that
//! could still make the top of the ranking.
//!
//! ## Architecture
//!
//! - **Design Search** ([`design`]) - Best-first search over partial and complete sequences
//! - **Sequence Sampling** ([`sampling`]) - Cheap optimistic bounds for partial sequences
//!
//! ## Key Capabilities
//!
//! - **Top-K ranking** with results streamed to a [`design::ScoreWriter`] as they are proven
//! - **Mutation limits** and **stability filtering** against the wild type
//! - **Optional precompute** of the immutable sites on background threads

pub mod design;
pub mod sampling;
