//! Error types and handling for the pairing and secure-messaging subsystem.
//!
//! This module provides a unified error handling system across all components
//! of the crate, implementing proper error propagation and user-friendly
//! error messages.

use thiserror::Error;

/// Result type alias for the pairlink library
pub type Result<T> = std::result::Result<T, PairlinkError>;

/// Comprehensive error type for all pairlink operations
#[derive(Error, Debug, Clone)]
pub enum PairlinkError {
    /// Relay transport errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Cryptographic operation errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Secure-channel state machine errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Base64 encoding/decoding errors
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Relay transport and room-management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Channel identifier is not a well-formed UUID v4
    #[error("Invalid channel id: {channel_id}")]
    InvalidChannelId { channel_id: String },

    /// A non-empty room already exists under this channel id
    #[error("Channel already exists: {channel_id}")]
    ChannelAlreadyExists { channel_id: String },

    /// The room already holds two members
    #[error("Room already full: {channel_id}")]
    RoomFull { channel_id: String },

    /// A message arrived for a channel this transport did not join
    #[error("Wrong channel id: expected {expected}, got {actual}")]
    WrongChannelId { expected: String, actual: String },

    /// The relay socket dropped. Recoverable: surfaces as a state
    /// transition on the channel, never as a crash.
    #[error("Relay disconnected")]
    Disconnected,

    /// Error payload returned by the relay server
    #[error("Relay rejected request: {reason}")]
    Rejected { reason: String },
}

/// Cryptographic operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encrypt/decrypt attempted before the handshake completed
    #[error("Keys not exchanged")]
    KeysNotExchanged,

    /// Handshake message received in a step that does not expect it
    #[error("Wrong handshake step: expected {expected}, got {actual}")]
    WrongHandshakeStep { expected: String, actual: String },

    /// Invalid key format or size
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    /// Encryption operation failure
    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    /// Decryption operation failure
    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    /// Key derivation failure
    #[error("Key derivation failed: {reason}")]
    KeyDerivation { reason: String },
}

/// Secure-channel lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was terminated; no further operations are accepted
    #[error("Channel terminated")]
    Terminated,

    /// The peer never showed up before the waiting timer fired
    #[error("Timed out waiting for peer")]
    Timeout,

    /// Operation invalid in the current connection state
    #[error("Invalid channel state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    /// No channel id has been established yet
    #[error("Not connected to any channel")]
    NotConnected,
}

/// Session persistence errors. All of these are non-fatal: losing
/// persisted state only forces a fresh pairing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying storage write failed
    #[error("Persistence failure: {reason}")]
    PersistenceFailure { reason: String },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration serialization error
    #[error("Configuration serialization error: {reason}")]
    Serialize { reason: String },
}

impl PairlinkError {
    /// Returns true if this error is recoverable without re-pairing.
    ///
    /// Relay disconnections and persistence failures are expected, frequent
    /// events (mobile backgrounding, network handoff, storage quota); they
    /// must never tear a channel down on their own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Relay(RelayError::Disconnected) | Self::Store(_))
    }

    /// Returns true if this error indicates a protocol violation that must
    /// abort the handshake rather than be papered over.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::KeysNotExchanged)
                | Self::Crypto(CryptoError::WrongHandshakeStep { .. })
        )
    }
}

impl From<std::io::Error> for PairlinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PairlinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
