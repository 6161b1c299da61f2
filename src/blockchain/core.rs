pub mod chain;
pub mod difficulty;
pub mod state;

pub use chain::*;
pub use difficulty::*;
