//! Connection lifecycle management.

mod manager;
mod state;

pub use manager::{ConnectionManager, FrameRouter};
pub use state::ConnectionState;
