//! # Pairlink
//!
//! A pairing and secure-messaging library: two peers rendezvous in a
//! two-member relay room, run a SYN/SYNACK/ACK key exchange, and then
//! exchange end-to-end encrypted payloads the relay cannot read.
//!
//! ## Features
//!
//! - **End-to-End Encryption**: X25519 ECDH with a derived ChaCha20-Poly1305
//!   channel key, or per-message ECIES, behind one interface
//! - **Out-of-Band Pairing**: UUID-keyed rooms advertised via QR code or
//!   deeplink, capped at exactly two members
//! - **Resumable Sessions**: the rendezvous persists across restarts; keys
//!   never do, every reconnection runs a fresh exchange
//! - **Relay Server**: a bundled newline-delimited-JSON relay with
//!   per-client rate limiting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pairlink::{ChannelMetadata, MemorySessionStore, PairlinkConfig, SecureChannel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PairlinkConfig::default();
//!     let (channel, mut notifications) = SecureChannel::new(
//!         &config,
//!         ChannelMetadata::default(),
//!         Box::new(MemorySessionStore::new()),
//!     )
//!     .await?;
//!
//!     let pairing = channel.generate_channel_id_connect()?;
//!     println!("share out-of-band: {} {}", pairing.channel_id, pairing.public_key);
//!
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{:?}", notification.kind);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`relay`]: the room-based relay server and its client
//! - [`keyexchange`]: the three-way handshake and payload sealing
//! - [`channel`]: the channel lifecycle state machine and the
//!   [`SecureChannel`] driver
//! - [`session`]: persisted, resumable pairings
//! - [`crypto`]: key pairs, ECDH derivation, and the cipher shapes
//! - [`utils`]: configuration and error handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod crypto;
pub mod keyexchange;
pub mod relay;
pub mod session;
pub mod utils;

// Re-export commonly used types for convenience
pub use channel::{
    ChannelMetadata, ChannelNotification, ConnectionState, NotificationKind, OriginatorInfo,
    PairingInfo, SecureChannel, WalletInfo,
};
pub use keyexchange::KeyExchange;
pub use relay::{RelayClient, RelayEvent, RelayServer};
pub use session::{ChannelConfig, FileSessionStore, MemorySessionStore, SessionStore};
pub use utils::{PairlinkConfig, PairlinkError, Result};

/// Version information for the pairing protocol
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default configuration values
pub mod defaults {
    /// Default TCP port of the relay server
    pub const DEFAULT_RELAY_PORT: u16 = 7599;

    /// Default per-client budget for room-management requests, per second
    pub const DEFAULT_CONTROL_RATE_LIMIT: u32 = 100;

    /// Default per-client budget for payload messages, per second
    pub const DEFAULT_MESSAGE_RATE_LIMIT: u32 = 1000;

    /// Default waiting-for-peer window in milliseconds
    pub const DEFAULT_WAITING_TIMEOUT_MS: u64 = 3_000;

    /// Default session lifetime in milliseconds (7 days)
    pub const DEFAULT_SESSION_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1_000;

    /// Default bound on the pre-link send queue
    pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 64;
}
