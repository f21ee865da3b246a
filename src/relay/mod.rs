//! The relay transport: wire protocol, rate limiting, server, and client.
//!
//! The relay is an untrusted intermediary. It routes opaque payloads between
//! at most two members of a room keyed by channel id and reports membership
//! changes; it can see channel identifiers and ciphertext, nothing else.

pub mod client;
pub mod protocol;
pub mod rate_limit;
pub mod server;

pub use client::{RelayClient, RelayEvent};
pub use protocol::{validate_channel_id, ClientRequest, ServerEvent};
pub use rate_limit::RateLimiter;
pub use server::RelayServer;
