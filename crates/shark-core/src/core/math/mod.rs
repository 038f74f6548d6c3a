pub mod boltzmann;
pub mod weight;

pub use boltzmann::BoltzmannCalculator;
pub use weight::Weight;
