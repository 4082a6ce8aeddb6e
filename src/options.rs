//! Client configuration and connection endpoint resolution.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ReverbError, Result};

/// A known cluster entry: fixed host, port, and TLS setting.
#[derive(Debug, Clone, Copy)]
struct ClusterEntry {
    id: &'static str,
    host: &'static str,
    port: u16,
    use_tls: bool,
}

/// Static cluster table. Not negotiated on the wire.
const CLUSTERS: &[ClusterEntry] = &[
    ClusterEntry {
        id: "us-east-1",
        host: "ws-us-east-1.reverb.cloud",
        port: 443,
        use_tls: true,
    },
    ClusterEntry {
        id: "us-west-2",
        host: "ws-us-west-2.reverb.cloud",
        port: 443,
        use_tls: true,
    },
    ClusterEntry {
        id: "eu-west-1",
        host: "ws-eu-west-1.reverb.cloud",
        port: 443,
        use_tls: true,
    },
    ClusterEntry {
        id: "ap-southeast-2",
        host: "ws-ap-southeast-2.reverb.cloud",
        port: 443,
        use_tls: true,
    },
    ClusterEntry {
        id: "local",
        host: "127.0.0.1",
        port: 8080,
        use_tls: false,
    },
];

/// Configuration options for creating a Reverb client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Application key from the Reverb application credentials
    pub app_key: String,

    /// WebSocket host (default: 127.0.0.1)
    #[serde(default)]
    pub host: Option<String>,

    /// WebSocket port (default: 8080)
    #[serde(default)]
    pub port: Option<u16>,

    /// Use TLS/WSS connection
    #[serde(default)]
    pub use_tls: Option<bool>,

    /// Cluster identifier. When set, the cluster entry overrides any
    /// explicitly supplied host, port, and TLS setting.
    #[serde(default)]
    pub cluster: Option<String>,

    /// Custom socket path (default: /app/{app_key})
    #[serde(default)]
    pub ws_path: Option<String>,

    /// Authorization endpoint for private/presence/encrypted channels
    #[serde(default)]
    pub auth_endpoint: Option<String>,

    /// Maximum reconnect backoff delay in seconds (default: 30)
    #[serde(default)]
    pub max_reconnect_delay_secs: Option<u64>,
}

impl ClientOptions {
    /// Create options with just the app key
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            host: None,
            port: None,
            use_tls: None,
            cluster: None,
            ws_path: None,
            auth_endpoint: None,
            max_reconnect_delay_secs: None,
        }
    }

    /// Builder pattern: set host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder pattern: set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder pattern: enable/disable TLS
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }

    /// Builder pattern: select a cluster by id
    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Builder pattern: set a custom socket path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = Some(path.into());
        self
    }

    /// Builder pattern: set auth endpoint
    pub fn auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = Some(endpoint.into());
        self
    }

    /// Resolve into a validated [`Config`].
    ///
    /// A cluster id, when given, wins over explicit host/port/TLS values.
    /// This priority is deliberate and documented; presets pin all three
    /// endpoint fields as a unit.
    pub fn resolve(self) -> Result<Config> {
        if self.app_key.is_empty() {
            return Err(ReverbError::config("App key must not be empty"));
        }

        let (host, port, use_tls) = match &self.cluster {
            Some(id) => {
                let entry = CLUSTERS
                    .iter()
                    .find(|c| c.id == id)
                    .ok_or_else(|| ReverbError::config(format!("Unknown cluster '{}'", id)))?;
                (entry.host.to_string(), entry.port, entry.use_tls)
            }
            None => (
                self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
                self.port.unwrap_or(8080),
                self.use_tls.unwrap_or(false),
            ),
        };

        if host.is_empty() {
            return Err(ReverbError::config("Host must not be empty"));
        }
        if port == 0 {
            return Err(ReverbError::config("Port must be in 1..=65535"));
        }

        let ws_path = self
            .ws_path
            .unwrap_or_else(|| format!("/app/{}", self.app_key));

        Ok(Config {
            app_key: self.app_key,
            host,
            port,
            use_tls,
            ws_path,
            auth_endpoint: self.auth_endpoint,
            max_reconnect_delay: Duration::from_secs(self.max_reconnect_delay_secs.unwrap_or(30)),
        })
    }
}

/// Validated configuration derived from [`ClientOptions`].
#[derive(Debug, Clone)]
pub struct Config {
    pub app_key: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub ws_path: String,
    pub auth_endpoint: Option<String>,
    pub max_reconnect_delay: Duration,
}

impl Config {
    /// The effective WebSocket URL.
    pub fn ws_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.ws_path)
    }
}
