//! Client facade and channel registry.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{no_extra_headers, AuthClient, Authorizer};
use crate::channels::{Channel, ChannelKind, SendFrame, SocketIdSource};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::crypto::EventCipher;
use crate::error::{ReverbError, Result};
use crate::events::EventDispatcher;
use crate::options::{ClientOptions, Config};
use crate::protocol::{validate_channel_name, ChannelEvent};
use crate::transport::{NativeTransport, Transport};

type ConnectedHook = Arc<dyn Fn(&str) + Send + Sync>;
type DisconnectedHook = Arc<dyn Fn() + Send + Sync>;
type ReconnectingHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ReverbError) + Send + Sync>;
type StateHook = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct UserHooks {
    connected: RwLock<Option<ConnectedHook>>,
    disconnected: RwLock<Option<DisconnectedHook>>,
    reconnecting: RwLock<Option<ReconnectingHook>>,
    error: RwLock<Option<ErrorHook>>,
    state: RwLock<Option<StateHook>>,
}

struct ClientInner {
    config: Config,
    manager: Arc<ConnectionManager>,
    channels: DashMap<String, Arc<Channel>>,
    authorizer: RwLock<Option<Authorizer>>,
    /// Receives every event delivered on any registered channel
    dispatcher: EventDispatcher,
    hooks: UserHooks,
}

/// The Reverb client: one connection, a channel registry, and the
/// subscription entry points.
///
/// Values are cheap to clone and share one underlying connection. The
/// caller owns the client; dropping the last clone tears everything down.
#[derive(Clone)]
pub struct ReverbClient {
    inner: Arc<ClientInner>,
}

impl ReverbClient {
    /// Create a client over the native WebSocket transport.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::with_transport(options, Box::new(NativeTransport::new()))
    }

    /// Create a client over a caller-supplied transport.
    pub fn with_transport(options: ClientOptions, transport: Box<dyn Transport>) -> Result<Self> {
        let config = options.resolve()?;
        let manager = ConnectionManager::new(config.clone(), transport);

        let inner = Arc::new(ClientInner {
            config,
            manager,
            channels: DashMap::new(),
            authorizer: RwLock::new(None),
            dispatcher: EventDispatcher::new(),
            hooks: UserHooks::default(),
        });

        inner.install_manager_hooks(&inner);

        Ok(Self { inner })
    }

    /// Supply the authorizer used for private, presence, and encrypted
    /// channel handshakes.
    pub fn set_authorizer(&self, authorizer: Authorizer) {
        *self.inner.authorizer.write() = Some(authorizer);
    }

    /// Open the connection. Fails without retrying if the socket cannot be
    /// opened; reconnection only ever follows an unexpected drop.
    pub async fn connect(&self) -> Result<()> {
        self.inner.manager.connect().await
    }

    /// Disconnect and dispose every registered channel. Suppresses any
    /// pending auto-reconnect.
    pub async fn disconnect(&self) {
        for entry in self.inner.channels.iter() {
            let _ = entry.value().unsubscribe();
            entry.value().unbind_all();
        }
        self.inner.channels.clear();
        self.inner.manager.disconnect().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    pub fn socket_id(&self) -> Option<String> {
        self.inner.manager.socket_id()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.manager.is_connected()
    }

    /// Subscribe to a public channel. Returns the existing instance when
    /// the name is already registered.
    pub async fn subscribe_to_channel(&self, name: &str) -> Result<Arc<Channel>> {
        validate_channel_name(name)?;
        let channel = self
            .inner
            .get_or_create(name, ChannelKind::Public, |inner| {
                Channel::new(
                    name,
                    ChannelKind::Public,
                    inner.send_capability(),
                    inner.socket_id_capability(),
                )
            })?;

        // Before the connection is up the frame cannot go out; the channel
        // is re-subscribed automatically once the connection establishes.
        match channel.subscribe().await {
            Ok(()) => {}
            Err(ReverbError::ConnectionError { .. }) => {
                debug!("Deferred subscription of '{}' until connected", name);
            }
            Err(e) => {
                self.inner.report_error(&e);
                return Err(e);
            }
        }
        Ok(channel)
    }

    /// Subscribe to a private channel. Requires a configured auth endpoint
    /// and an established connection.
    pub async fn subscribe_to_private_channel(&self, name: &str) -> Result<Arc<Channel>> {
        validate_channel_name(name)?;
        if !name.starts_with("private-") || name.starts_with("private-encrypted-") {
            return Err(ReverbError::invalid_channel_name(
                name,
                "private channel names must start with 'private-' (use encrypted_channel for 'private-encrypted-')",
            ));
        }
        let auth = self.inner.auth_client()?;
        self.inner.require_socket_id(name)?;

        let channel = self
            .inner
            .get_or_create(name, ChannelKind::Private, |inner| {
                Ok(Channel::new(
                    name,
                    ChannelKind::Private,
                    inner.send_capability(),
                    inner.socket_id_capability(),
                )?
                .with_auth(auth))
            })?;
        if let Err(e) = channel.subscribe().await {
            self.inner.report_error(&e);
            return Err(e);
        }
        Ok(channel)
    }

    /// Subscribe to a presence channel. `channel_data` is the member payload
    /// forwarded to the auth endpoint.
    pub async fn subscribe_to_presence_channel(
        &self,
        name: &str,
        channel_data: Option<Value>,
    ) -> Result<Arc<Channel>> {
        validate_channel_name(name)?;
        if !name.starts_with("presence-") {
            return Err(ReverbError::invalid_channel_name(
                name,
                "presence channel names must start with 'presence-'",
            ));
        }
        let auth = self.inner.auth_client()?;
        self.inner.require_socket_id(name)?;

        let channel = self
            .inner
            .get_or_create(name, ChannelKind::Presence, |inner| {
                let mut channel = Channel::new(
                    name,
                    ChannelKind::Presence,
                    inner.send_capability(),
                    inner.socket_id_capability(),
                )?
                .with_auth(auth);
                if let Some(data) = channel_data.clone() {
                    channel = channel.with_channel_data(data);
                }
                Ok(channel)
            })?;
        if let Err(e) = channel.subscribe().await {
            self.inner.report_error(&e);
            return Err(e);
        }
        Ok(channel)
    }

    /// Register an encrypted channel. The name prefix and master key are
    /// validated before any registry lookup, and unlike the other entry
    /// points the subscription is not sent; call `subscribe()` explicitly.
    pub fn encrypted_channel(&self, name: &str, master_key_b64: &str) -> Result<Arc<Channel>> {
        validate_channel_name(name)?;
        if !name.starts_with("private-encrypted-") {
            return Err(ReverbError::invalid_channel_name(
                name,
                "encrypted channel names must start with 'private-encrypted-'",
            ));
        }
        let cipher = EventCipher::new(master_key_b64)?;
        let auth = self.inner.auth_client()?;
        self.inner.require_socket_id(name)?;

        self.inner
            .get_or_create(name, ChannelKind::Encrypted, |inner| {
                Ok(Channel::new(
                    name,
                    ChannelKind::Encrypted,
                    inner.send_capability(),
                    inner.socket_id_capability(),
                )?
                .with_auth(auth)
                .with_cipher(cipher))
            })
    }

    /// Unsubscribe a channel and drop it from the registry. Unknown names
    /// and repeated calls are no-ops.
    pub fn unsubscribe_from_channel(&self, name: &str) {
        if let Some((_, channel)) = self.inner.channels.remove(name) {
            let _ = channel.unsubscribe();
            channel.unbind_all();
        }
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.inner.channels.get(name).map(|c| c.clone())
    }

    /// Names of every registered channel.
    pub fn channels(&self) -> Vec<String> {
        self.inner.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Names of the channels currently in the subscribed state.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.inner
            .channels
            .iter()
            .filter(|e| e.value().is_subscribed())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Bind a listener that sees every event on every registered channel.
    pub fn bind_global(&self, callback: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> u64 {
        self.inner.dispatcher.bind_global(callback)
    }

    /// Bind a listener for one event name across all registered channels.
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> u64 {
        self.inner.dispatcher.bind(event_name, callback)
    }

    pub fn unbind(&self, event_name: Option<&str>, listener_id: Option<u64>) {
        self.inner.dispatcher.unbind(event_name, listener_id);
    }

    pub fn on_connected(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.hooks.connected.write() = Some(Arc::new(hook));
    }

    pub fn on_disconnected(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.hooks.disconnected.write() = Some(Arc::new(hook));
    }

    pub fn on_reconnecting(&self, hook: impl Fn(u32, Duration) + Send + Sync + 'static) {
        *self.inner.hooks.reconnecting.write() = Some(Arc::new(hook));
    }

    pub fn on_error(&self, hook: impl Fn(&ReverbError) + Send + Sync + 'static) {
        *self.inner.hooks.error.write() = Some(Arc::new(hook));
    }

    pub fn on_state_change(&self, hook: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.inner.hooks.state.write() = Some(Arc::new(hook));
    }
}

impl std::fmt::Debug for ReverbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverbClient")
            .field("state", &self.state())
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn install_manager_hooks(&self, self_arc: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self_arc);
        self.manager.set_router(Arc::new(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.route(envelope);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self_arc);
        self.manager.on_connected(move |socket_id| {
            if let Some(inner) = weak.upgrade() {
                inner.resubscribe_all();
                let hook = inner.hooks.connected.read().clone();
                if let Some(hook) = hook {
                    hook(socket_id);
                }
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self_arc);
        self.manager.on_disconnected(move || {
            if let Some(inner) = weak.upgrade() {
                for entry in inner.channels.iter() {
                    entry.value().mark_disconnected();
                }
                let hook = inner.hooks.disconnected.read().clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self_arc);
        self.manager.on_reconnecting(move |attempt, delay| {
            if let Some(inner) = weak.upgrade() {
                let hook = inner.hooks.reconnecting.read().clone();
                if let Some(hook) = hook {
                    hook(attempt, delay);
                }
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self_arc);
        self.manager.on_error(move |error| {
            if let Some(inner) = weak.upgrade() {
                let hook = inner.hooks.error.read().clone();
                if let Some(hook) = hook {
                    hook(error);
                }
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self_arc);
        self.manager.on_state_change(move |state| {
            if let Some(inner) = weak.upgrade() {
                let hook = inner.hooks.state.read().clone();
                if let Some(hook) = hook {
                    hook(state);
                }
            }
        });
    }

    /// Route one non-connection frame to its channel. The channel name comes
    /// from the top-level field or, for lifecycle acknowledgements, from the
    /// inner payload. Events for unknown channels are dropped silently.
    fn route(&self, envelope: crate::protocol::Envelope) {
        // Only system events are guaranteed to string-wrap their payload;
        // an application event carrying a plain string passes through as-is.
        let data = envelope
            .inner_data()
            .or_else(|| envelope.data.clone())
            .unwrap_or(Value::Null);
        let name = envelope.channel.clone().or_else(|| {
            data.get("channel")
                .and_then(|v| v.as_str())
                .map(String::from)
        });

        let Some(name) = name else {
            debug!("Dropping channel-less event '{}'", envelope.event);
            return;
        };
        let Some(channel) = self.channels.get(&name).map(|c| c.clone()) else {
            debug!("Dropping event '{}' for unknown channel '{}'", envelope.event, name);
            return;
        };

        channel.handle_event(ChannelEvent::new(name, envelope.event, data));
    }

    /// Re-send subscriptions for every registered channel. Runs after every
    /// connection establishment, which covers both the initial connect and
    /// reconnects.
    fn resubscribe_all(&self) {
        for entry in self.channels.iter() {
            let channel = entry.value().clone();
            let error_hook = self.hooks.error.read().clone();
            tokio::spawn(async move {
                if let Err(e) = channel.subscribe().await {
                    warn!("Re-subscription of '{}' failed: {}", channel.name(), e);
                    if let Some(hook) = error_hook {
                        hook(&e);
                    }
                }
            });
        }
    }

    /// Surface an error through the registered global error hook.
    fn report_error(&self, error: &ReverbError) {
        let hook = self.hooks.error.read().clone();
        if let Some(hook) = hook {
            hook(error);
        }
    }

    fn send_capability(&self) -> SendFrame {
        let manager = self.manager.clone();
        Arc::new(move |envelope| manager.send(envelope))
    }

    fn socket_id_capability(&self) -> SocketIdSource {
        let manager = self.manager.clone();
        Arc::new(move || manager.socket_id())
    }

    fn auth_client(&self) -> Result<AuthClient> {
        let endpoint = self.config.auth_endpoint.as_ref().ok_or_else(|| {
            ReverbError::config("No auth endpoint configured for authenticated channels")
        })?;
        let authorizer = self
            .authorizer
            .read()
            .clone()
            .unwrap_or_else(no_extra_headers);
        Ok(AuthClient::new(endpoint.clone(), authorizer))
    }

    fn require_socket_id(&self, channel: &str) -> Result<()> {
        if self.manager.socket_id().is_none() {
            return Err(ReverbError::connection(format!(
                "Cannot subscribe to '{}' before the connection is established",
                channel
            )));
        }
        Ok(())
    }

    fn get_or_create(
        &self,
        name: &str,
        kind: ChannelKind,
        build: impl FnOnce(&Self) -> Result<Channel>,
    ) -> Result<Arc<Channel>> {
        match self.channels.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.kind() != kind {
                    return Err(ReverbError::ChannelTypeConflict {
                        name: name.to_string(),
                        existing: existing.kind(),
                        requested: kind,
                    });
                }
                Ok(existing.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let channel = Arc::new(build(self)?);
                let dispatcher = self.dispatcher.clone();
                channel.bind_global(move |event| dispatcher.emit(event));
                entry.insert(channel.clone());
                Ok(channel)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelState;
    use crate::error::Result as ClientResult;
    use crate::transport::{CloseCallback, ErrorCallback, MessageCallback};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeShared {
        connected: RwLock<bool>,
        fail_connects: AtomicBool,
        sent: Mutex<Vec<String>>,
        on_message: RwLock<Option<MessageCallback>>,
        on_close: RwLock<Option<CloseCallback>>,
    }

    impl FakeShared {
        fn fire_message(&self, text: &str) {
            let guard = self.on_message.read();
            guard.as_ref().expect("no message callback")(text);
        }

        fn fire_close(&self) {
            *self.connected.write() = false;
            let guard = self.on_close.read();
            guard.as_ref().expect("no close callback")(None, None);
        }

        fn sent_frames(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    struct FakeTransport {
        shared: Arc<FakeShared>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&mut self, _url: &str) -> ClientResult<()> {
            if self.shared.fail_connects.load(Ordering::SeqCst) {
                return Err(ReverbError::connection("refused"));
            }
            *self.shared.connected.write() = true;
            Ok(())
        }

        async fn close(&mut self) {
            *self.shared.connected.write() = false;
        }

        fn send(&self, message: &str) -> bool {
            if !*self.shared.connected.read() {
                return false;
            }
            self.shared.sent.lock().push(message.to_string());
            true
        }

        fn is_connected(&self) -> bool {
            *self.shared.connected.read()
        }

        fn on_message(&mut self, callback: MessageCallback) {
            *self.shared.on_message.write() = Some(callback);
        }

        fn on_close(&mut self, callback: CloseCallback) {
            *self.shared.on_close.write() = Some(callback);
        }

        fn on_error(&mut self, _callback: ErrorCallback) {}
    }

    fn test_client() -> (ReverbClient, Arc<FakeShared>) {
        let shared = Arc::new(FakeShared::default());
        let transport = FakeTransport {
            shared: shared.clone(),
        };
        let options = ClientOptions::new("test-key").auth_endpoint("http://127.0.0.1:1/auth");
        let client = ReverbClient::with_transport(options, Box::new(transport)).unwrap();
        (client, shared)
    }

    async fn connect_established(client: &ReverbClient, shared: &FakeShared, socket_id: &str) {
        client.connect().await.unwrap();
        shared.fire_message(&format!(
            r#"{{"event":"pusher:connection_established","data":"{{\"socket_id\":\"{}\",\"activity_timeout\":30}}"}}"#,
            socket_id
        ));
    }

    #[tokio::test]
    async fn test_connect_subscribe_receive() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;
        assert_eq!(client.socket_id().as_deref(), Some("81.1"));

        let channel = client.subscribe_to_channel("orders").await.unwrap();
        assert!(shared.sent_frames()[0].contains("pusher:subscribe"));

        shared.fire_message(
            r#"{"event":"pusher_internal:subscription_succeeded","channel":"orders","data":"{}"}"#,
        );
        assert!(channel.is_subscribed());
        assert_eq!(client.subscribed_channels(), vec!["orders".to_string()]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel.bind("order.created", move |event| {
            seen_clone.lock().push(event.data.clone());
        });

        shared.fire_message(
            r#"{"event":"order.created","channel":"orders","data":{"id":7}}"#,
        );
        assert_eq!(seen.lock().as_slice(), [json!({"id": 7})]);
    }

    #[tokio::test]
    async fn test_lifecycle_ack_with_name_in_payload_only() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        let channel = client.subscribe_to_channel("orders").await.unwrap();
        shared.fire_message(
            r#"{"event":"pusher_internal:subscription_succeeded","data":"{\"channel\":\"orders\"}"}"#,
        );
        assert!(channel.is_subscribed());
    }

    #[tokio::test]
    async fn test_same_name_returns_same_instance() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        let first = client.subscribe_to_channel("orders").await.unwrap();
        let second = client.subscribe_to_channel("orders").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Only one subscribe frame went out.
        let subscribes = shared
            .sent_frames()
            .iter()
            .filter(|f| f.contains("pusher:subscribe"))
            .count();
        assert_eq!(subscribes, 1);
    }

    #[tokio::test]
    async fn test_kind_conflict_is_an_error() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        client.subscribe_to_channel("presence-room").await.unwrap();
        let result = client
            .subscribe_to_presence_channel("presence-room", None)
            .await;
        assert!(matches!(
            result,
            Err(ReverbError::ChannelTypeConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_name_sends_nothing() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;
        let frames_before = shared.sent_frames().len();

        assert!(client.subscribe_to_channel("bad name!").await.is_err());
        assert!(client.get_channel("bad name!").is_none());
        assert_eq!(shared.sent_frames().len(), frames_before);
    }

    #[tokio::test]
    async fn test_auth_failure_reaches_error_hook() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        // The endpoint at 127.0.0.1:1 is unreachable, so the handshake
        // fails and must surface both ways.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.on_error(move |error| {
            seen_clone.lock().push(error.to_string());
        });

        let result = client.subscribe_to_private_channel("private-orders").await;
        assert!(matches!(
            result,
            Err(ReverbError::AuthenticationError { .. })
        ));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_non_json_string_payload_is_delivered_verbatim() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;
        let channel = client.subscribe_to_channel("orders").await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel.bind("order.note", move |event| {
            seen_clone.lock().push(event.data.clone());
        });

        shared.fire_message(
            r#"{"event":"order.note","channel":"orders","data":"left at the door"}"#,
        );
        assert_eq!(seen.lock().as_slice(), [json!("left at the door")]);
    }

    #[tokio::test]
    async fn test_private_requires_connection() {
        let (client, _shared) = test_client();
        let result = client.subscribe_to_private_channel("private-orders").await;
        assert!(matches!(result, Err(ReverbError::ConnectionError { .. })));
    }

    #[tokio::test]
    async fn test_private_rejects_encrypted_prefix() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;
        let result = client
            .subscribe_to_private_channel("private-encrypted-vault")
            .await;
        assert!(matches!(
            result,
            Err(ReverbError::InvalidChannelName { .. })
        ));
    }

    #[tokio::test]
    async fn test_encrypted_channel_validates_key_before_registry() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        let result = client.encrypted_channel("private-encrypted-vault", "short");
        assert!(matches!(
            result,
            Err(ReverbError::ConfigurationError { .. })
        ));
        assert!(client.get_channel("private-encrypted-vault").is_none());
    }

    #[tokio::test]
    async fn test_encrypted_channel_does_not_auto_subscribe() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;
        let frames_before = shared.sent_frames().len();

        let key = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.encode([0u8; 32])
        };
        let channel = client
            .encrypted_channel("private-encrypted-vault", &key)
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Unsubscribed);
        assert_eq!(shared.sent_frames().len(), frames_before);
    }

    #[tokio::test]
    async fn test_unknown_channel_events_are_dropped() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        // Must not panic or error.
        shared.fire_message(r#"{"event":"x","channel":"nobody","data":{}}"#);
        assert!(client.channels().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_noop() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        client.subscribe_to_channel("orders").await.unwrap();
        client.unsubscribe_from_channel("orders");
        assert!(client.get_channel("orders").is_none());
        client.unsubscribe_from_channel("orders");
    }

    #[tokio::test]
    async fn test_disconnect_clears_registry() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        client.subscribe_to_channel("orders").await.unwrap();
        client.disconnect().await;

        assert!(client.channels().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.socket_id().is_none());
    }

    #[tokio::test]
    async fn test_drop_marks_channels_unsubscribed() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        let channel = client.subscribe_to_channel("orders").await.unwrap();
        shared.fire_message(
            r#"{"event":"pusher_internal:subscription_succeeded","channel":"orders","data":"{}"}"#,
        );
        assert!(channel.is_subscribed());

        shared.fire_close();
        assert_eq!(channel.state(), ChannelState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_resubscribe_after_reconnect() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;

        let channel = client.subscribe_to_channel("orders").await.unwrap();
        shared.fire_message(
            r#"{"event":"pusher_internal:subscription_succeeded","channel":"orders","data":"{}"}"#,
        );

        shared.fire_close();
        assert!(!channel.is_subscribed());

        // Reconnect succeeds and a fresh socket id arrives.
        *shared.connected.write() = true;
        shared.fire_message(
            r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"81.2\",\"activity_timeout\":30}"}"#,
        );

        // Re-subscription runs on a spawned task.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let subscribes = shared
            .sent_frames()
            .iter()
            .filter(|f| f.contains("pusher:subscribe"))
            .count();
        assert_eq!(subscribes, 2);
        assert_eq!(client.socket_id().as_deref(), Some("81.2"));
    }

    #[tokio::test]
    async fn test_client_wide_bind() {
        let (client, shared) = test_client();
        connect_established(&client, &shared, "81.1").await;
        client.subscribe_to_channel("orders").await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.bind_global(move |event| {
            seen_clone.lock().push((event.channel.clone(), event.event.clone()));
        });

        shared.fire_message(r#"{"event":"order.created","channel":"orders","data":{"id":1}}"#);
        assert_eq!(
            seen.lock().as_slice(),
            [("orders".to_string(), "order.created".to_string())]
        );
    }

    #[tokio::test]
    async fn test_user_hooks_fire() {
        let (client, shared) = test_client();
        let connected_with = Arc::new(Mutex::new(None));
        let connected_clone = connected_with.clone();
        client.on_connected(move |socket_id| {
            *connected_clone.lock() = Some(socket_id.to_string());
        });

        connect_established(&client, &shared, "81.1").await;
        assert_eq!(connected_with.lock().as_deref(), Some("81.1"));
    }
}
