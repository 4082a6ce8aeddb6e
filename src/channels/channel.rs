//! Channel subscription state machine.
//!
//! One [`Channel`] value covers all four channel kinds. Behavior that only
//! some kinds have (authorization, member tracking, payload decryption) is
//! attached as optional capabilities instead of subtypes, so the lifecycle
//! logic exists exactly once.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::members::{Member, Members};
use crate::auth::AuthClient;
use crate::crypto::EventCipher;
use crate::error::{ReverbError, Result};
use crate::events::EventDispatcher;
use crate::protocol::{self, event, ChannelEvent, Envelope, MemberData};

/// The four channel kinds, derived from the name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
    Encrypted,
}

impl ChannelKind {
    /// Classify a channel name by its prefix.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("private-encrypted-") {
            Self::Encrypted
        } else if name.starts_with("presence-") {
            Self::Presence
        } else if name.starts_with("private-") {
            Self::Private
        } else {
            Self::Public
        }
    }

    /// Whether subscribing requires the authorization handshake.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Public)
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Presence => "presence",
            Self::Encrypted => "encrypted",
        };
        write!(f, "{}", s)
    }
}

/// Subscription lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::Unsubscribing => "unsubscribing",
        };
        write!(f, "{}", s)
    }
}

/// Sends one frame over the live connection. Returns false when there is no
/// connection to send on.
pub type SendFrame = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Reads the socket id assigned by the current connection, if any.
pub type SocketIdSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

fn is_protocol_event(name: &str) -> bool {
    name.starts_with("pusher:") || name.starts_with("pusher_internal:")
}

/// A single channel with its subscription state, listeners, and the
/// capabilities its kind requires.
pub struct Channel {
    name: String,
    kind: ChannelKind,
    state: RwLock<ChannelState>,
    dispatcher: EventDispatcher,
    send_frame: SendFrame,
    socket_id: SocketIdSource,
    auth: Option<AuthClient>,
    /// Member payload sent with the authorization request on presence channels
    channel_data: Option<Value>,
    cipher: Option<EventCipher>,
    members: Option<Members>,
    events_tx: broadcast::Sender<ChannelEvent>,
}

impl Channel {
    /// Build a channel. The name is validated here, so an invalid name can
    /// never reach the wire.
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        send_frame: SendFrame,
        socket_id: SocketIdSource,
    ) -> Result<Self> {
        let name = name.into();
        protocol::validate_channel_name(&name)?;
        let (events_tx, _) = broadcast::channel(64);
        Ok(Self {
            name,
            kind,
            state: RwLock::new(ChannelState::Unsubscribed),
            dispatcher: EventDispatcher::new(),
            send_frame,
            socket_id,
            auth: None,
            channel_data: None,
            cipher: None,
            members: if kind == ChannelKind::Presence {
                Some(Members::new())
            } else {
                None
            },
            events_tx,
        })
    }

    pub fn with_auth(mut self, auth: AuthClient) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_channel_data(mut self, channel_data: Value) -> Self {
        self.channel_data = Some(channel_data);
        self
    }

    pub fn with_cipher(mut self, cipher: EventCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state() == ChannelState::Subscribed
    }

    /// Snapshot of the presence roster. Empty for non-presence channels.
    pub fn members(&self) -> Vec<Member> {
        self.members
            .as_ref()
            .map(|m| m.members())
            .unwrap_or_default()
    }

    pub fn member_count(&self) -> usize {
        self.members.as_ref().map(|m| m.count()).unwrap_or(0)
    }

    /// Request the subscription. No-op when already subscribed or a
    /// subscription is in flight, so repeated calls send at most one frame.
    pub async fn subscribe(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ChannelState::Subscribed | ChannelState::Subscribing => {
                    debug!("Channel '{}' already {}", self.name, *state);
                    return Ok(());
                }
                _ => *state = ChannelState::Subscribing,
            }
        }

        let (auth_token, channel_data) = if self.kind.requires_auth() {
            match self.run_auth_handshake().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut state = self.state.write();
                    if *state == ChannelState::Subscribing {
                        *state = ChannelState::Unsubscribed;
                    }
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        // The handshake awaited; bail out if something moved the channel on.
        if *self.state.read() != ChannelState::Subscribing {
            return Ok(());
        }

        let frame = protocol::subscribe_frame(&self.name, auth_token, channel_data);
        if !(self.send_frame)(&frame) {
            *self.state.write() = ChannelState::Unsubscribed;
            return Err(ReverbError::connection(format!(
                "Cannot subscribe to '{}': not connected",
                self.name
            )));
        }

        debug!("Sent subscribe for '{}'", self.name);
        Ok(())
    }

    async fn run_auth_handshake(&self) -> Result<(Option<String>, Option<Value>)> {
        let auth = self.auth.as_ref().ok_or_else(|| {
            ReverbError::config(format!(
                "Channel '{}' requires auth but no endpoint is configured",
                self.name
            ))
        })?;

        let socket_id = (self.socket_id)().ok_or_else(|| {
            ReverbError::connection(format!(
                "Cannot authorize '{}' before the connection is established",
                self.name
            ))
        })?;

        let request_data = match &self.channel_data {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        match auth
            .authorize(&self.name, &socket_id, request_data.as_deref())
            .await
        {
            Ok(token) => {
                let channel_data = token
                    .channel_data
                    .or_else(|| request_data.map(Value::String));
                Ok((Some(token.auth), channel_data))
            }
            Err(failure) => {
                // A failure from a subscription that was raced out of
                // Subscribing is stale and must not be surfaced.
                if *self.state.read() != ChannelState::Subscribing {
                    return Ok((None, None));
                }
                warn!(
                    "Authorization failed for '{}': {}",
                    self.name, failure.message
                );
                Err(ReverbError::authentication(
                    &self.name,
                    failure.status,
                    failure.message,
                ))
            }
        }
    }

    /// Request the unsubscription. No-op when not subscribed.
    pub fn unsubscribe(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ChannelState::Unsubscribed | ChannelState::Unsubscribing => {
                    return Ok(());
                }
                _ => *state = ChannelState::Unsubscribing,
            }
        }

        if !(self.send_frame)(&protocol::unsubscribe_frame(&self.name)) {
            // Connection is gone; the server already dropped the subscription.
            self.mark_disconnected();
        }
        Ok(())
    }

    /// Bind a listener for one event name. Returns the listener id.
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> u64 {
        self.dispatcher.bind(event_name, callback)
    }

    /// Bind a listener for every event on this channel.
    pub fn bind_global(&self, callback: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> u64 {
        self.dispatcher.bind_global(callback)
    }

    pub fn unbind(&self, event_name: Option<&str>, listener_id: Option<u64>) {
        self.dispatcher.unbind(event_name, listener_id);
    }

    pub fn unbind_all(&self) {
        self.dispatcher.unbind_all();
    }

    /// Subscribe to the stream of every event delivered on this channel.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    /// Route one decoded event into this channel. Lifecycle events mutate
    /// state before listeners run; everything else is delivered as-is, with
    /// encrypted payloads decrypted first.
    pub fn handle_event(&self, incoming: ChannelEvent) {
        match incoming.event.as_str() {
            event::SUBSCRIPTION_SUCCEEDED => {
                *self.state.write() = ChannelState::Subscribed;
                if let Some(members) = &self.members {
                    members.replace_from_presence(&incoming.data);
                }
                debug!("Channel '{}' subscribed", self.name);
                self.deliver(incoming);
            }
            event::UNSUBSCRIPTION_SUCCEEDED => {
                *self.state.write() = ChannelState::Unsubscribed;
                if let Some(members) = &self.members {
                    members.clear();
                }
                debug!("Channel '{}' unsubscribed", self.name);
                self.deliver(incoming);
                // Bound listeners go with the subscription; broadcast stream
                // receivers stay valid and simply see no further events.
                self.dispatcher.unbind_all();
            }
            event::MEMBER_ADDED => {
                if let Some(members) = &self.members {
                    match serde_json::from_value::<MemberData>(incoming.data.clone()) {
                        Ok(data) => members.upsert(Member::new(
                            data.user_id,
                            data.user_info
                                .unwrap_or_else(|| Value::Object(Default::default())),
                        )),
                        Err(e) => warn!("Malformed member_added on '{}': {}", self.name, e),
                    }
                }
                self.deliver(incoming);
            }
            event::MEMBER_REMOVED => {
                if let Some(members) = &self.members {
                    if let Ok(data) = serde_json::from_value::<MemberData>(incoming.data.clone()) {
                        members.remove(&data.user_id);
                    }
                }
                self.deliver(incoming);
            }
            name if self.cipher.is_some() && !is_protocol_event(name) => {
                self.deliver_decrypted(incoming);
            }
            _ => self.deliver(incoming),
        }
    }

    fn deliver_decrypted(&self, incoming: ChannelEvent) {
        let Some(cipher) = &self.cipher else {
            return self.deliver(incoming);
        };
        match cipher.decrypt(&incoming.data) {
            Ok(plaintext) => {
                self.deliver(ChannelEvent::new(&self.name, incoming.event, plaintext));
            }
            Err(e) => {
                warn!(
                    "Dropping undecryptable '{}' on '{}': {}",
                    incoming.event, self.name, e
                );
                // The synthetic event carries a generic message only; the
                // concrete failure stays in the log.
                self.deliver(ChannelEvent::new(
                    &self.name,
                    event::DECRYPTION_ERROR,
                    serde_json::json!({
                        "error": "decryption_failed",
                        "event": incoming.event,
                        "message": "Failed to decrypt event payload",
                    }),
                ));
            }
        }
    }

    fn deliver(&self, event: ChannelEvent) {
        self.dispatcher.emit(&event);
        let _ = self.events_tx.send(event);
    }

    /// Reset to unsubscribed after a connection loss. Listeners survive so
    /// a re-subscription resumes delivery transparently.
    pub fn mark_disconnected(&self) {
        *self.state.write() = ChannelState::Unsubscribed;
        if let Some(members) = &self.members {
            members.clear();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
