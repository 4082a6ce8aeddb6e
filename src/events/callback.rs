//! Callback registry for per-event listener bookkeeping.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::protocol::ChannelEvent;

/// Type alias for a listener function
pub type ListenerFn = Arc<dyn Fn(&ChannelEvent) + Send + Sync + 'static>;

/// A registered listener with its id
#[derive(Clone)]
pub struct Listener {
    pub id: u64,
    pub callback: ListenerFn,
}

impl Listener {
    pub fn new(id: u64, callback: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> Self {
        Self {
            id,
            callback: Arc::new(callback),
        }
    }

    pub fn invoke(&self, event: &ChannelEvent) {
        (self.callback)(event);
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

/// Registry storing listeners per event name, in insertion order.
///
/// `get` returns a snapshot clone so dispatch never iterates the live
/// collection: a listener may bind or unbind other listeners mid-dispatch.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    /// Event-specific listeners: event name -> [listeners]
    listeners: DashMap<String, Vec<Listener>>,
    /// Global listeners that receive all events
    global_listeners: RwLock<Vec<Listener>>,
    /// Counter for generating unique listener ids
    next_id: std::sync::atomic::AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            global_listeners: RwLock::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Add a listener for a specific event
    pub fn add(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_id();
        self.listeners
            .entry(event_name.into())
            .or_default()
            .push(Listener::new(id, callback));
        id
    }

    /// Add a global listener that receives all events
    pub fn add_global(&self, callback: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> u64 {
        let id = self.next_id();
        self.global_listeners.write().push(Listener::new(id, callback));
        id
    }

    /// Snapshot of the listeners for one event
    pub fn get(&self, event_name: &str) -> Vec<Listener> {
        self.listeners
            .get(event_name)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the global listeners
    pub fn get_global(&self) -> Vec<Listener> {
        self.global_listeners.read().clone()
    }

    /// Remove listeners. With an id, removes that listener; without, clears
    /// every listener for the event. Removing an absent listener is a no-op.
    pub fn remove(&self, event_name: Option<&str>, listener_id: Option<u64>) {
        match (event_name, listener_id) {
            (Some(name), Some(id)) => {
                if let Some(mut listeners) = self.listeners.get_mut(name) {
                    listeners.retain(|l| l.id != id);
                }
            }
            (Some(name), None) => {
                self.listeners.remove(name);
            }
            (None, Some(id)) => {
                for mut entry in self.listeners.iter_mut() {
                    entry.retain(|l| l.id != id);
                }
                self.global_listeners.write().retain(|l| l.id != id);
            }
            (None, None) => {
                self.clear();
            }
        }
    }

    /// Remove all listeners
    pub fn clear(&self) {
        self.listeners.clear();
        self.global_listeners.write().clear();
    }

    /// Check if any listener is bound for an event
    pub fn has_listeners(&self, event_name: &str) -> bool {
        self.listeners
            .get(event_name)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        let event_count: usize = self.listeners.iter().map(|v| v.len()).sum();
        event_count + self.global_listeners.read().len()
    }
}
