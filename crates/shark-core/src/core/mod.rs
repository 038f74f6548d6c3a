pub mod energy;
pub mod io;
pub mod math;
pub mod space;
