//! Channel kinds, subscription state, and presence member tracking.

mod channel;
mod members;

pub use channel::{Channel, ChannelKind, ChannelState, SendFrame, SocketIdSource};
pub use members::{Member, Members};
