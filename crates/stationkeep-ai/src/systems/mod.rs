//! Systems - logic that operates on components

mod combat;
mod htn;

pub use combat::*;
pub use htn::*;
