//! Connection manager owning the socket and its lifecycle.
//!
//! The manager is the only component that touches the wire: every outbound
//! frame funnels through [`ConnectionManager::send`], and every inbound
//! frame is decoded here before connection events are absorbed and the rest
//! is handed to the installed router.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::state::ConnectionState;
use crate::error::{ReverbError, Result};
use crate::options::Config;
use crate::protocol::{self, event, ConnectionEstablished, Envelope};
use crate::transport::Transport;

/// Receives every decoded frame that is not a connection-level event.
pub type FrameRouter = Arc<dyn Fn(Envelope) + Send + Sync>;

type ConnectedHook = Arc<dyn Fn(&str) + Send + Sync>;
type DisconnectedHook = Arc<dyn Fn() + Send + Sync>;
type ReconnectingHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ReverbError) + Send + Sync>;
type StateHook = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    connected: RwLock<Option<ConnectedHook>>,
    disconnected: RwLock<Option<DisconnectedHook>>,
    reconnecting: RwLock<Option<ReconnectingHook>>,
    error: RwLock<Option<ErrorHook>>,
    state: RwLock<Option<StateHook>>,
}

pub struct ConnectionManager {
    config: Config,
    /// Handle to ourselves for transport callbacks and spawned retries
    weak_self: Weak<Self>,
    transport: Mutex<Box<dyn Transport>>,
    state: RwLock<ConnectionState>,
    socket_id: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    /// Set by a manual disconnect; checked when a pending backoff elapses
    manual_disconnect: AtomicBool,
    router: RwLock<Option<FrameRouter>>,
    hooks: Hooks,
}

impl ConnectionManager {
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            weak_self: weak.clone(),
            transport: Mutex::new(transport),
            state: RwLock::new(ConnectionState::Disconnected),
            socket_id: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            manual_disconnect: AtomicBool::new(false),
            router: RwLock::new(None),
            hooks: Hooks::default(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn socket_id(&self) -> Option<String> {
        self.socket_id.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Install the handler for frames the manager does not consume itself.
    pub fn set_router(&self, router: FrameRouter) {
        *self.router.write() = Some(router);
    }

    pub fn on_connected(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hooks.connected.write() = Some(Arc::new(hook));
    }

    pub fn on_disconnected(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hooks.disconnected.write() = Some(Arc::new(hook));
    }

    pub fn on_reconnecting(&self, hook: impl Fn(u32, Duration) + Send + Sync + 'static) {
        *self.hooks.reconnecting.write() = Some(Arc::new(hook));
    }

    pub fn on_error(&self, hook: impl Fn(&ReverbError) + Send + Sync + 'static) {
        *self.hooks.error.write() = Some(Arc::new(hook));
    }

    pub fn on_state_change(&self, hook: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.hooks.state.write() = Some(Arc::new(hook));
    }

    fn set_state(&self, new_state: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == new_state {
                return;
            }
            debug!("Connection state: {} -> {}", *state, new_state);
            *state = new_state;
        }
        let hook = self.hooks.state.read().clone();
        if let Some(hook) = hook {
            hook(new_state);
        }
    }

    /// Open the connection. A failure here is final: the manager enters the
    /// error state and does not retry. Only an unexpected mid-session drop
    /// triggers the reconnect procedure.
    pub async fn connect(&self) -> Result<()> {
        self.manual_disconnect.store(false, Ordering::SeqCst);
        self.connect_inner(false).await
    }

    async fn connect_inner(&self, from_reconnect: bool) -> Result<()> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
            _ => {}
        }
        self.set_state(ConnectionState::Connecting);

        let url = self.config.ws_url();
        self.install_transport_callbacks().await;

        let result = {
            let mut transport = self.transport.lock().await;
            transport.connect(&url).await
        };

        match result {
            Ok(()) => {
                info!("Socket open to {}", url);
                Ok(())
            }
            Err(e) => {
                if from_reconnect && !self.manual_disconnect.load(Ordering::SeqCst) {
                    // Failed retry feeds back into the backoff loop.
                    self.set_state(ConnectionState::Disconnected);
                    self.schedule_reconnect();
                    Ok(())
                } else {
                    self.set_state(ConnectionState::Error);
                    let error_hook = self.hooks.error.read().clone();
                    if let Some(hook) = error_hook {
                        hook(&e);
                    }
                    Err(e)
                }
            }
        }
    }

    async fn install_transport_callbacks(&self) {
        let mut transport = self.transport.lock().await;

        let weak = self.weak_self.clone();
        transport.on_message(Box::new(move |text| {
            if let Some(manager) = weak.upgrade() {
                manager.handle_raw_frame(text);
            }
        }));

        let weak = self.weak_self.clone();
        transport.on_close(Box::new(move |code, reason| {
            if let Some(manager) = weak.upgrade() {
                manager.handle_unexpected_close(code, reason);
            }
        }));

        let weak = self.weak_self.clone();
        transport.on_error(Box::new(move |message| {
            if let Some(manager) = weak.upgrade() {
                // Raw transport errors never surface directly.
                let error = ReverbError::connection(message);
                manager.set_state(ConnectionState::Error);
                let hook = manager.hooks.error.read().clone();
                if let Some(hook) = hook {
                    hook(&error);
                }
            }
        }));
    }

    /// Decode and route one inbound frame.
    pub(crate) fn handle_raw_frame(&self, raw: &str) {
        let envelope = match protocol::decode_frame(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };

        match envelope.event.as_str() {
            event::CONNECTION_ESTABLISHED => {
                let established: ConnectionEstablished = match envelope.parse_inner() {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Malformed connection_established: {}", e);
                        return;
                    }
                };
                info!("Connection established, socket id {}", established.socket_id);
                *self.socket_id.write() = Some(established.socket_id.clone());
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                let hook = self.hooks.connected.read().clone();
                if let Some(hook) = hook {
                    hook(&established.socket_id);
                }
            }
            event::PING => {
                self.send(&protocol::pong_frame());
            }
            _ => {
                let router = self.router.read().clone();
                if let Some(router) = router {
                    router(envelope);
                }
            }
        }
    }

    fn handle_unexpected_close(&self, code: Option<u16>, reason: Option<String>) {
        if self.manual_disconnect.load(Ordering::SeqCst) {
            return;
        }

        warn!(
            "Socket closed unexpectedly (code {:?}, reason {:?})",
            code, reason
        );
        *self.socket_id.write() = None;
        self.set_state(ConnectionState::Disconnected);
        let hook = self.hooks.disconnected.read().clone();
        if let Some(hook) = hook {
            hook();
        }
        self.schedule_reconnect();
    }

    /// Begin one backoff cycle: delay doubles per attempt, capped at the
    /// configured maximum, and a manual disconnect in the interim cancels
    /// the pending retry when the delay elapses.
    fn schedule_reconnect(&self) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = backoff_delay(attempt, self.config.max_reconnect_delay);

        self.set_state(ConnectionState::Reconnecting);
        let hook = self.hooks.reconnecting.read().clone();
        if let Some(hook) = hook {
            hook(attempt, delay);
        }
        info!("Reconnect attempt {} in {:?}", attempt, delay);

        let Some(manager) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.manual_disconnect.load(Ordering::SeqCst) {
                debug!("Reconnect cancelled by manual disconnect");
                return;
            }
            let _ = manager.connect_inner(true).await;
        });
    }

    /// Close the connection and suppress any pending or future reconnect.
    pub async fn disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);
        {
            let mut transport = self.transport.lock().await;
            transport.close().await;
        }
        *self.socket_id.write() = None;
        self.set_state(ConnectionState::Disconnected);
        let hook = self.hooks.disconnected.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Write one frame to the socket. The single outbound choke point.
    pub fn send(&self, envelope: &Envelope) -> bool {
        let text = match protocol::encode_frame(envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode outbound frame: {}", e);
                return false;
            }
        };
        match self.transport.try_lock() {
            Ok(transport) => transport.send(&text),
            Err(_) => false,
        }
    }
}

fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let secs = 1u64
        .checked_shl(attempt)
        .unwrap_or(u64::MAX)
        .min(max.as_secs());
    Duration::from_secs(secs)
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("socket_id", &self.socket_id())
            .finish_non_exhaustive()
    }
}
