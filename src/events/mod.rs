//! Event dispatching and listener management.

mod callback;
mod dispatcher;

pub use callback::{Listener, ListenerFn, ListenerRegistry};
pub use dispatcher::EventDispatcher;
