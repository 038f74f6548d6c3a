pub mod matrix;
pub mod oracle;
pub mod pruning;
pub mod table;

pub use matrix::{EnergyBreakdown, EnergyMatrix};
pub use oracle::{CostOracle, MinimizedConf, OracleError};
pub use pruning::{DynamicPruner, PruningMatrix};
pub use table::TableOracle;
