//! Database module for PostgreSQL persistence.

mod bookmarks;
mod pool;

pub use bookmarks::*;
pub use pool::*;
