//! Pusher protocol envelope types and encoding/decoding.
//!
//! Every frame on the socket is a JSON text message of the shape
//! `{"event": ..., "data": ..., "channel": ...}`. For system events the
//! `data` field is itself a JSON-encoded string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReverbError, Result};

/// Outer JSON structure wrapping every wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            channel: None,
            data: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The `data` payload with the system-event string level removed.
    ///
    /// Servers JSON-encode the payload of `pusher:` / `pusher_internal:`
    /// events into a string; application events carry it as-is.
    pub fn inner_data(&self) -> Option<Value> {
        match &self.data {
            Some(Value::String(s)) => serde_json::from_str(s).ok(),
            Some(other) => Some(other.clone()),
            None => None,
        }
    }

    /// Typed view of the inner payload.
    pub fn parse_inner<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let inner = self
            .inner_data()
            .ok_or_else(|| ReverbError::serialization("No data in envelope"))?;
        serde_json::from_value(inner).map_err(Into::into)
    }
}

/// Encode an envelope to a wire frame.
pub fn encode_frame(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(Into::into)
}

/// Decode a wire frame into an envelope.
pub fn decode_frame(raw: &str) -> Result<Envelope> {
    serde_json::from_str(raw).map_err(Into::into)
}

/// Build a `pusher:subscribe` frame. `auth` and `channel_data` are only
/// present for authenticated channel kinds.
pub fn subscribe_frame(
    channel: &str,
    auth: Option<String>,
    channel_data: Option<Value>,
) -> Envelope {
    let mut data = serde_json::json!({ "channel": channel });
    if let Some(auth) = auth {
        data["auth"] = Value::String(auth);
    }
    if let Some(cd) = channel_data {
        data["channel_data"] = cd;
    }
    Envelope::new(event::SUBSCRIBE).with_data(data)
}

/// Build a `pusher:unsubscribe` frame.
pub fn unsubscribe_frame(channel: &str) -> Envelope {
    Envelope::new(event::UNSUBSCRIBE).with_data(serde_json::json!({ "channel": channel }))
}

/// Build a `pusher:pong` reply.
pub fn pong_frame() -> Envelope {
    Envelope::new(event::PONG).with_data(serde_json::json!({}))
}

/// Decoded application event delivered to channel listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

impl ChannelEvent {
    pub fn new(channel: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
            data,
        }
    }
}

/// Inner payload of `pusher:connection_established`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Inner payload of `pusher:member_added` / `pusher:member_removed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberData {
    pub user_id: String,
    #[serde(default)]
    pub user_info: Option<Value>,
}

/// Well-known protocol event names.
pub mod event {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const UNSUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:unsubscription_succeeded";
    pub const MEMBER_ADDED: &str = "pusher:member_added";
    pub const MEMBER_REMOVED: &str = "pusher:member_removed";
    pub const DECRYPTION_ERROR: &str = "pusher:decryption_error";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
}

/// Maximum channel name length accepted by the server.
pub const MAX_CHANNEL_NAME_LEN: usize = 200;

/// Validate a channel name against the length and charset rules.
///
/// Names are limited to 200 characters from `[a-zA-Z0-9_\-=@,.;]`.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ReverbError::invalid_channel_name(name, "name is empty"));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(ReverbError::invalid_channel_name(
            name,
            format!("name exceeds {} characters", MAX_CHANNEL_NAME_LEN),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=' | '@' | ',' | '.' | ';')))
    {
        return Err(ReverbError::invalid_channel_name(
            name,
            format!("character '{}' is not allowed", bad),
        ));
    }
    Ok(())
}
