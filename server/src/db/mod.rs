//! PostgreSQL persistence for both stores.

mod pool;
pub mod sql;
mod store;

pub use pool::*;
pub use store::*;
