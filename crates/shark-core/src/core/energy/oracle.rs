use super::matrix::{EnergyBreakdown, EnergyMatrix};
use super::pruning::PruningMatrix;
use crate::core::space::{Assignment, ChoiceTuple, ConfSpace};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("Minimization of {assignment} failed: {reason}")]
    MinimizationFailed { assignment: String, reason: String },

    #[error("Cannot minimize partial assignment {0}")]
    PartialAssignment(String),

    #[error("Inconsistent energy tables: {0}")]
    InvalidTables(String),
}

/// Result of an exact minimization of one full conformation.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizedConf {
    pub energy: f64,
    pub breakdown: EnergyBreakdown,
}

/// The energy model the bound engine runs on.
///
/// The oracle supplies two pairwise tables: a lower-bound table (pairwise-minimized energies, so
/// every conformation's exact energy is at least its lower-table energy) and a rigid table
/// (an upper bound on every conformation's exact energy). Exact energies are available on demand
/// through [`minimize`](CostOracle::minimize), and tuple-restricted minimizations through
/// [`minimize_tuple`](CostOracle::minimize_tuple).
///
/// Implementations are shared across worker threads.
pub trait CostOracle: Send + Sync {
    fn space(&self) -> &ConfSpace;

    fn lower_matrix(&self) -> &EnergyMatrix;

    fn rigid_matrix(&self) -> &EnergyMatrix;

    fn pruning(&self) -> &PruningMatrix;

    fn lower_bound_cost(&self, assignment: &Assignment) -> f64 {
        self.lower_matrix().conf_energy(assignment)
    }

    fn rigid_cost(&self, assignment: &Assignment) -> f64 {
        self.rigid_matrix().conf_energy(assignment)
    }

    /// Exact energy of a full conformation with its per-site breakdown.
    fn minimize(&self, conf: &Assignment) -> Result<MinimizedConf, OracleError>;

    /// Exact energy of the interactions internal to `tuple`.
    fn minimize_tuple(&self, tuple: &ChoiceTuple) -> Result<f64, OracleError>;

    /// An oracle over the given sites only, if this oracle supports restriction.
    fn restrict(&self, _sites: &[usize]) -> Option<Arc<dyn CostOracle>> {
        None
    }
}
