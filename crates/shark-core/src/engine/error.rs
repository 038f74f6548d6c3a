use thiserror::Error;

use super::config::ConfigError;
use super::executor::ExecutorError;
use crate::core::energy::OracleError;
use std::time::Duration;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    #[error("Cost oracle failed: {source}")]
    Oracle {
        #[from]
        source: OracleError,
    },

    #[error("Task execution failed: {source}")]
    Executor {
        #[from]
        source: ExecutorError,
    },

    #[error(
        "Soundness violation: minimized energy {energy} of {assignment} is below its lower bound {lower_bound}"
    )]
    SoundnessViolation {
        assignment: String,
        energy: f64,
        lower_bound: f64,
    },

    #[error("Bounds got looser: epsilon went from {previous} to {current}")]
    BoundsLoosened { previous: f64, current: f64 },

    #[error("Timed out after {waited:?} waiting for shared entry '{key}'")]
    RemoteTimeout { key: String, waited: Duration },

    #[error("Search made no progress on {sequence} while the queue still holds {queued} nodes")]
    SearchStalled { sequence: String, queued: usize },

    #[error("Failed to write results: {0}")]
    Output(String),

    #[error("Optimization phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: &'static str, reason: String },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
