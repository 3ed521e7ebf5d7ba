//! Request handlers for entity, tree and drift operations.

mod drift;
mod entities;
mod trees;

pub use drift::*;
pub use entities::*;
pub use trees::*;
