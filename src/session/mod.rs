//! Session persistence for resumable pairings.

pub mod store;

pub use store::{ChannelConfig, FileSessionStore, MemorySessionStore, SessionStore};
