//! Configuration, error handling, and shared utilities.

pub mod config;
pub mod errors;

pub use config::{LoggingConfig, PairlinkConfig, RelayConfig, SessionConfig, DEFAULT_CONFIG_FILE};
pub use errors::{
    ChannelError, ConfigError, CryptoError, PairlinkError, RelayError, Result, StoreError,
};
