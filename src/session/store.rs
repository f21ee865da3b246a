//! Persisted channel sessions.
//!
//! A paired channel is remembered as a [`ChannelConfig`] so the originator
//! can rejoin the same relay room after a restart. Only the rendezvous is
//! persisted; a resumed channel always runs a fresh key exchange, so a
//! stolen session file never yields message keys.

use crate::utils::{PairlinkError, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// Everything needed to find a previously paired channel again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Relay room identifier
    pub channel_id: Uuid,
    /// Expiry as epoch milliseconds
    pub valid_until: i64,
    /// Our public key from the last completed exchange, hex-encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,
    /// The peer's public key from the last completed exchange, hex-encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_key: Option<String>,
}

impl ChannelConfig {
    /// Whether the session has passed its expiry
    pub fn is_expired(&self) -> bool {
        self.valid_until <= chrono::Utc::now().timestamp_millis()
    }
}

/// Storage backend for the single active session
pub trait SessionStore: Send {
    /// Write the session, replacing any previous one
    fn persist(&mut self, config: &ChannelConfig) -> Result<()>;

    /// Read the session back, if one exists and has not expired.
    ///
    /// An expired or unreadable session is deleted and reported as absent;
    /// the caller merely has to pair again.
    fn load(&mut self) -> Result<Option<ChannelConfig>>;

    /// Forget the session
    fn clear(&mut self) -> Result<()>;
}

/// File-backed store writing one JSON document
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Create a store backed by the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn persist(&mut self, config: &ChannelConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PairlinkError::Store(StoreError::PersistenceFailure {
                    reason: format!("creating {}: {e}", parent.display()),
                })
            })?;
        }
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, json).map_err(|e| {
            PairlinkError::Store(StoreError::PersistenceFailure {
                reason: format!("writing {}: {e}", self.path.display()),
            })
        })
    }

    fn load(&mut self) -> Result<Option<ChannelConfig>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PairlinkError::Store(StoreError::PersistenceFailure {
                    reason: format!("reading {}: {e}", self.path.display()),
                }))
            }
        };

        let config: ChannelConfig = match serde_json::from_str(&json) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("session file {} is corrupt ({e}), removing", self.path.display());
                self.clear()?;
                return Ok(None);
            }
        };

        if config.is_expired() {
            log::info!("session for channel {} expired, removing", config.channel_id);
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(config))
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PairlinkError::Store(StoreError::PersistenceFailure {
                reason: format!("removing {}: {e}", self.path.display()),
            })),
        }
    }
}

/// In-memory store for tests and throwaway channels
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    config: Option<ChannelConfig>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn persist(&mut self, config: &ChannelConfig) -> Result<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<ChannelConfig>> {
        if let Some(config) = &self.config {
            if config.is_expired() {
                self.config = None;
                return Ok(None);
            }
        }
        Ok(self.config.clone())
    }

    fn clear(&mut self) -> Result<()> {
        self.config = None;
        Ok(())
    }
}
