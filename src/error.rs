//! Error types for the Reverb client library.

use thiserror::Error;

use crate::channels::ChannelKind;

/// Result type alias for Reverb client operations
pub type Result<T> = std::result::Result<T, ReverbError>;

/// Main error type for the Reverb client
#[derive(Error, Debug, Clone)]
pub enum ReverbError {
    /// Bad host, port, cluster id, app key, or encryption key shape.
    /// Fatal at construction, never retried.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Socket open or transport failure. Reported via the error hook and,
    /// for unexpected mid-session drops, followed by auto-reconnect.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Authorization handshake failure for a single channel. Carries the
    /// HTTP status when the endpoint responded at all.
    #[error("Authentication failed for channel '{channel}': {message}")]
    AuthenticationError {
        channel: String,
        status: Option<u16>,
        message: String,
    },

    /// Channel name violates the length, charset, or prefix rules.
    #[error("Invalid channel name '{name}': {reason}")]
    InvalidChannelName { name: String, reason: String },

    /// An existing channel was re-requested as a different kind.
    #[error("Channel '{name}' is already registered as {existing:?}, requested {requested:?}")]
    ChannelTypeConflict {
        name: String,
        existing: ChannelKind,
        requested: ChannelKind,
    },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },
}

impl ReverbError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: msg.into(),
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: msg.into(),
        }
    }

    pub fn authentication(
        channel: impl Into<String>,
        status: Option<u16>,
        msg: impl Into<String>,
    ) -> Self {
        Self::AuthenticationError {
            channel: channel.into(),
            status,
            message: msg.into(),
        }
    }

    pub fn invalid_channel_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChannelName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError {
            message: msg.into(),
        }
    }

    /// HTTP status attached to an authentication failure, if any.
    pub fn auth_status(&self) -> Option<u16> {
        match self {
            Self::AuthenticationError { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ReverbError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<url::ParseError> for ReverbError {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("Invalid URL: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ReverbError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::connection(format!("{:?}", err))
    }
}
