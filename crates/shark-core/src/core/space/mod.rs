pub mod assignment;
pub mod sequence;
pub mod site;

pub use assignment::{Assignment, AssignmentIndex, ChoiceTuple};
pub use sequence::{ChoiceSet, Sequence};
pub use site::{Choice, ConfSpace, Site, SpaceError};
