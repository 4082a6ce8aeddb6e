//! Connection lifecycle states.

/// The lifecycle of the underlying socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, and none being attempted
    Disconnected,
    /// A user-initiated connection attempt is in flight
    Connecting,
    /// Connected and a socket id has been assigned
    Connected,
    /// Connection lost; waiting out the backoff before retrying
    Reconnecting,
    /// A user-initiated connection attempt failed; no retry scheduled
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}
