pub mod problem;

pub use problem::{DesignProblem, ProblemLoadError};
