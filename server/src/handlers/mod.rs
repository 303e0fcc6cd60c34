//! Request handlers for sync operations.

mod bootstrap;
mod events;
mod push;

pub use bootstrap::*;
pub use events::*;
pub use push::*;
