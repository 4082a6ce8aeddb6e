//! Event dispatcher fanning decoded events out to bound listeners.

use std::sync::Arc;
use tracing::{debug, warn};

use super::callback::ListenerRegistry;
use crate::protocol::ChannelEvent;

/// Event dispatcher that manages listener bindings and event emission.
///
/// This is the fan-out core used by channels and the client facade. Emission
/// iterates over snapshots, so listeners may freely bind or unbind others
/// while a dispatch is in flight.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<ListenerRegistry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Bind a listener to a specific event
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> u64 {
        let name = event_name.into();
        debug!("Binding listener for event: {}", name);
        self.listeners.add(name, callback)
    }

    /// Bind a listener to all events
    pub fn bind_global(&self, callback: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> u64 {
        self.listeners.add_global(callback)
    }

    /// Unbind listeners from an event
    pub fn unbind(&self, event_name: Option<&str>, listener_id: Option<u64>) {
        self.listeners.remove(event_name, listener_id);
    }

    /// Unbind every listener
    pub fn unbind_all(&self) {
        self.listeners.clear();
    }

    /// Emit an event to the bound listeners. Unknown event names simply
    /// reach nobody; a panicking listener is contained and logged.
    pub fn emit(&self, event: &ChannelEvent) {
        for listener in self.listeners.get_global() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.invoke(event);
            })) {
                warn!("Global listener panicked: {:?}", e);
            }
        }

        for listener in self.listeners.get(&event.event) {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.invoke(event);
            })) {
                warn!("Listener for '{}' panicked: {:?}", event.event, e);
            }
        }
    }

    /// Check if any listener is bound for an event
    pub fn has_listeners(&self, event_name: &str) -> bool {
        self.listeners.has_listeners(event_name)
    }

    /// Total number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
