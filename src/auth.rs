//! HTTP-based authorization for private, presence, and encrypted channels.
//!
//! Subscribing to an authenticated channel exchanges the channel name and
//! socket id for a signed `auth` token via a POST to the application
//! backend. The handshake returns an explicit success/failure value; only
//! the channel decides whether a failure is surfaced.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Supplies extra request headers for an authorization call, given the
/// channel name and socket id. Typically adds a bearer token or cookie.
pub type Authorizer = Arc<dyn Fn(&str, &str) -> HashMap<String, String> + Send + Sync>;

/// Request body for channel authorization
#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_data: Option<&'a str>,
}

/// Response from the authorization endpoint
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    channel_data: Option<Value>,
}

/// Successful handshake result
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// Signed token echoed into the subscribe frame
    pub auth: String,
    /// Presence payload echoed back by the endpoint, if any
    pub channel_data: Option<Value>,
}

/// Failed handshake result. `status` is present when the endpoint responded
/// with a non-200 code; transport failures and malformed bodies carry none.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl AuthFailure {
    fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// HTTP client for the authorization handshake
#[derive(Clone)]
pub struct AuthClient {
    endpoint: String,
    authorizer: Authorizer,
    http: reqwest::Client,
}

impl AuthClient {
    pub fn new(endpoint: impl Into<String>, authorizer: Authorizer) -> Self {
        Self {
            endpoint: endpoint.into(),
            authorizer,
            http: reqwest::Client::new(),
        }
    }

    /// Run the handshake for one channel subscription.
    ///
    /// `channel_data` is the JSON-encoded member payload presence channels
    /// send along with the request.
    pub async fn authorize(
        &self,
        channel_name: &str,
        socket_id: &str,
        channel_data: Option<&str>,
    ) -> std::result::Result<AuthToken, AuthFailure> {
        let body = AuthRequest {
            socket_id,
            channel_name,
            channel_data,
        };

        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&body);

        for (key, value) in (self.authorizer)(channel_name, socket_id) {
            request = request.header(key, value);
        }

        debug!("Authorizing '{}' against {}", channel_name, self.endpoint);

        let response = request
            .send()
            .await
            .map_err(|e| AuthFailure::transport(format!("auth request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(AuthFailure {
                status: Some(status),
                message: format!("auth endpoint returned status {}", status),
            });
        }

        let parsed: AuthResponse = response
            .json()
            .await
            .map_err(|e| AuthFailure::transport(format!("malformed auth response: {}", e)))?;

        match parsed.auth {
            Some(auth) if !auth.is_empty() => Ok(AuthToken {
                auth,
                channel_data: parsed.channel_data,
            }),
            _ => Err(AuthFailure::transport("auth response carried no token")),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// An authorizer that adds no headers beyond the JSON defaults.
pub fn no_extra_headers() -> Authorizer {
    Arc::new(|_, _| HashMap::new())
}
