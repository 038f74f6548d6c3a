pub mod node;
pub mod order;
pub mod scorer;

pub use node::{BoundNode, BoundTree, NodeId, NodeWeights, RemainderBounds};
pub use order::BranchOrder;
pub use scorer::{ChildScore, NodeScorer, NodeSnapshot, ScoringEnv, ScoringTables};
