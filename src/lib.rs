//! Rust client for Laravel Reverb and other Pusher-protocol servers.
//!
//! The client maintains one WebSocket connection, a registry of channel
//! subscriptions, and the authorization and decryption plumbing the
//! private, presence, and encrypted channel kinds need.
//!
//! # Example
//!
//! ```no_run
//! use reverb_client::{ClientOptions, ReverbClient};
//!
//! # async fn run() -> reverb_client::Result<()> {
//! let client = ReverbClient::new(
//!     ClientOptions::new("app-key")
//!         .host("localhost")
//!         .port(8080)
//!         .auth_endpoint("http://localhost/broadcasting/auth"),
//! )?;
//!
//! client.connect().await?;
//!
//! let orders = client.subscribe_to_channel("orders").await?;
//! orders.bind("order.created", |event| {
//!     println!("new order: {}", event.data);
//! });
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channels;
pub mod client;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod events;
pub mod options;
pub mod protocol;
pub mod transport;

pub use auth::{AuthClient, AuthFailure, AuthToken, Authorizer};
pub use channels::{Channel, ChannelKind, ChannelState, Member};
pub use client::ReverbClient;
pub use connection::{ConnectionManager, ConnectionState};
pub use crypto::EventCipher;
pub use error::{Result, ReverbError};
pub use events::EventDispatcher;
pub use options::{ClientOptions, Config};
pub use protocol::{ChannelEvent, Envelope};
pub use transport::{NativeTransport, Transport};
