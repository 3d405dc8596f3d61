mod phase;
mod table;

pub use phase::{Outcome, Phase};
pub use table::{DEFAULT_TRANSITIONS, TableError, TransitionTable};
