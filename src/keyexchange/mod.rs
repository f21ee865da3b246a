//! The SYN/SYNACK/ACK key-exchange handshake.
//!
//! Run once per channel lifetime (and re-run from scratch after every
//! reconnect), the handshake carries each peer's ephemeral public key over
//! the relay and leaves both sides with the material needed by the selected
//! [`CipherScheme`]. Authentication is possession of the out-of-band channel
//! id, nothing more: the protocol defends confidentiality against the relay,
//! not against whoever joined the room first.
//!
//! State machine (the originator is whoever calls [`KeyExchange::start`]):
//!
//! ```text
//! originator:      None --start/SYN--> AwaitingSynAck --SYNACK/ACK--> Exchanged
//! non-originator:  None --SYN/SYNACK--> AwaitingAck   --ACK-->        Exchanged
//! ```
//!
//! Any handshake message delivered after `Exchanged` is ignored, so relay
//! retransmissions never re-derive secrets. Out-of-order messages are hard
//! errors: guessing intent here risks encrypting with no secret at all.

use crate::crypto::{
    open_ecies, open_symmetric, parse_public_key, seal_ecies, seal_symmetric, ChannelKeyPair,
    CipherScheme, SHARED_SECRET_SIZE,
};
use crate::utils::{CryptoError, Result};
use log::{debug, trace};
use x25519_dalek::PublicKey;

/// Position in the three-message handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// No handshake traffic yet
    None,
    /// SYN sent, waiting for the peer's SYNACK
    AwaitingSynAck,
    /// SYNACK sent, waiting for the closing ACK
    AwaitingAck,
    /// Handshake complete; encryption and decryption are now valid
    Exchanged,
}

impl std::fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::AwaitingSynAck => "awaiting_synack",
            Self::AwaitingAck => "awaiting_ack",
            Self::Exchanged => "exchanged",
        };
        write!(f, "{name}")
    }
}

/// A handshake message as carried over the relay (pre-encryption)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Originator opens the handshake with its public key
    Syn {
        /// Sender's hex-encoded ephemeral public key
        pubkey: Option<String>,
    },
    /// Non-originator answers with its own public key
    SynAck {
        /// Sender's hex-encoded ephemeral public key
        pubkey: Option<String>,
    },
    /// Originator closes the handshake
    Ack,
}

/// What a handled handshake message asks the caller to do
#[derive(Debug, Default)]
pub struct HandshakeOutcome {
    /// Message to send back over the relay, if any
    pub reply: Option<HandshakeMessage>,
    /// True exactly once, on the transition into [`HandshakeStep::Exchanged`]
    pub completed: bool,
}

/// Per-channel key-exchange state for one peer
pub struct KeyExchange {
    keypair: ChannelKeyPair,
    other_public_key: Option<PublicKey>,
    shared_secret: Option<[u8; SHARED_SECRET_SIZE]>,
    step: HandshakeStep,
    scheme: CipherScheme,
}

impl KeyExchange {
    /// Create a key exchange with a fresh ephemeral key pair
    pub fn new(scheme: CipherScheme) -> Self {
        Self {
            keypair: ChannelKeyPair::generate(),
            other_public_key: None,
            shared_secret: None,
            step: HandshakeStep::None,
            scheme,
        }
    }

    /// Create a key exchange that already knows the peer's public key
    /// (the joiner path: the key arrived in the QR/deeplink payload)
    pub fn with_other_public_key(scheme: CipherScheme, other: PublicKey) -> Self {
        let mut exchange = Self::new(scheme);
        exchange.other_public_key = Some(other);
        exchange
    }

    /// Our hex-encoded public key, surfaced out-of-band to the peer
    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// The peer's hex-encoded public key, once known
    pub fn other_public_key_hex(&self) -> Option<String> {
        self.other_public_key
            .as_ref()
            .map(|key| hex::encode(key.as_bytes()))
    }

    /// Current handshake step
    pub fn step(&self) -> HandshakeStep {
        self.step
    }

    /// True once the handshake has completed
    pub fn is_exchanged(&self) -> bool {
        self.step == HandshakeStep::Exchanged
    }

    /// Open the handshake (originator side). Emits the SYN to send.
    pub fn start(&mut self) -> Result<HandshakeMessage> {
        self.check_step(HandshakeStep::None, "start")?;
        self.step = HandshakeStep::AwaitingSynAck;

        debug!("key exchange started, sending SYN");
        Ok(HandshakeMessage::Syn {
            pubkey: Some(self.public_key_hex()),
        })
    }

    /// Feed one handshake message received from the relay.
    ///
    /// Idempotent after completion: redelivered messages are ignored without
    /// touching the derived secret or reporting completion again.
    pub fn handle_message(&mut self, message: HandshakeMessage) -> Result<HandshakeOutcome> {
        if self.is_exchanged() {
            trace!("handshake message after completion ignored: {message:?}");
            return Ok(HandshakeOutcome::default());
        }

        match message {
            HandshakeMessage::Syn { pubkey } => {
                self.check_step(HandshakeStep::None, "SYN")?;

                if let Some(hex_key) = pubkey {
                    self.record_other_public_key(&hex_key)?;
                }
                self.derive_secret()?;

                self.step = HandshakeStep::AwaitingAck;
                Ok(HandshakeOutcome {
                    reply: Some(HandshakeMessage::SynAck {
                        pubkey: Some(self.public_key_hex()),
                    }),
                    completed: false,
                })
            }
            HandshakeMessage::SynAck { pubkey } => {
                self.check_step(HandshakeStep::AwaitingSynAck, "SYNACK")?;

                let hex_key = pubkey.ok_or_else(|| CryptoError::InvalidKey {
                    reason: "SYNACK carried no public key".to_string(),
                })?;
                self.record_other_public_key(&hex_key)?;
                self.derive_secret()?;

                self.step = HandshakeStep::Exchanged;
                debug!("key exchange complete (originator)");
                Ok(HandshakeOutcome {
                    reply: Some(HandshakeMessage::Ack),
                    completed: true,
                })
            }
            HandshakeMessage::Ack => {
                self.check_step(HandshakeStep::AwaitingAck, "ACK")?;

                self.step = HandshakeStep::Exchanged;
                debug!("key exchange complete (non-originator)");
                Ok(HandshakeOutcome {
                    reply: None,
                    completed: true,
                })
            }
        }
    }

    /// Seal an application payload for the peer.
    ///
    /// # Errors
    ///
    /// Fails with `KeysNotExchanged` before the handshake completes; sending
    /// anything earlier would silently leak plaintext through the relay.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if !self.is_exchanged() {
            return Err(CryptoError::KeysNotExchanged.into());
        }

        match self.scheme {
            CipherScheme::SharedSecret => {
                let secret = self.shared_secret.ok_or(CryptoError::KeysNotExchanged)?;
                seal_symmetric(&secret, plaintext)
            }
            CipherScheme::Ecies => {
                let other = self
                    .other_public_key
                    .as_ref()
                    .ok_or(CryptoError::KeysNotExchanged)?;
                seal_ecies(other, plaintext)
            }
        }
    }

    /// Open an application payload sealed by the peer.
    ///
    /// # Errors
    ///
    /// Fails with `KeysNotExchanged` before the handshake completes.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if !self.is_exchanged() {
            return Err(CryptoError::KeysNotExchanged.into());
        }

        match self.scheme {
            CipherScheme::SharedSecret => {
                let secret = self.shared_secret.ok_or(CryptoError::KeysNotExchanged)?;
                open_symmetric(&secret, sealed)
            }
            CipherScheme::Ecies => open_ecies(self.keypair.secret(), sealed),
        }
    }

    /// Discard all handshake state and generate a fresh ephemeral key pair.
    /// Every reconnect re-pairs from here; derived secrets are never reused.
    pub fn reset(&mut self) {
        self.keypair = ChannelKeyPair::generate();
        self.other_public_key = None;
        self.shared_secret = None;
        self.step = HandshakeStep::None;
    }

    fn check_step(&self, expected: HandshakeStep, context: &str) -> Result<()> {
        if self.step != expected {
            return Err(CryptoError::WrongHandshakeStep {
                expected: expected.to_string(),
                actual: format!("{} (on {context})", self.step),
            }
            .into());
        }
        Ok(())
    }

    /// Record the peer key, refusing to overwrite an already-known key with
    /// a different one (a SYN may legitimately repeat the deeplink key).
    fn record_other_public_key(&mut self, hex_key: &str) -> Result<()> {
        let key = parse_public_key(hex_key)?;

        if let Some(existing) = &self.other_public_key {
            if existing.as_bytes() != key.as_bytes() {
                return Err(CryptoError::InvalidKey {
                    reason: "peer public key changed mid-handshake".to_string(),
                }
                .into());
            }
            return Ok(());
        }

        self.other_public_key = Some(key);
        Ok(())
    }

    fn derive_secret(&mut self) -> Result<()> {
        let other = self
            .other_public_key
            .as_ref()
            .ok_or_else(|| CryptoError::InvalidKey {
                reason: "peer public key unknown".to_string(),
            })?;

        self.shared_secret = Some(self.keypair.derive_shared_secret(other)?);
        Ok(())
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("step", &self.step)
            .field("scheme", &self.scheme)
            .field("public_key", &self.public_key_hex())
            .field("other_public_key", &self.other_public_key_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PairlinkError;

    /// Drive both sides through the full handshake
    fn exchanged_pair(scheme: CipherScheme) -> (KeyExchange, KeyExchange) {
        let mut originator = KeyExchange::new(scheme);
        let mut joiner = KeyExchange::new(scheme);

        let syn = originator.start().unwrap();
        let synack = joiner.handle_message(syn).unwrap().reply.unwrap();
        let outcome = originator.handle_message(synack).unwrap();
        assert!(outcome.completed);
        let ack = outcome.reply.unwrap();
        let outcome = joiner.handle_message(ack).unwrap();
        assert!(outcome.completed);

        (originator, joiner)
    }

    #[test]
    fn test_full_handshake_shared_secret() {
        let (originator, joiner) = exchanged_pair(CipherScheme::SharedSecret);

        assert!(originator.is_exchanged());
        assert!(joiner.is_exchanged());
        assert_eq!(originator.shared_secret, joiner.shared_secret);
        assert!(originator.shared_secret.is_some());
    }

    #[test]
    fn test_round_trip_both_directions() {
        for scheme in [CipherScheme::SharedSecret, CipherScheme::Ecies] {
            let (originator, joiner) = exchanged_pair(scheme);

            let to_joiner = originator.encrypt(b"eth_requestAccounts").unwrap();
            assert_eq!(joiner.decrypt(&to_joiner).unwrap(), b"eth_requestAccounts");

            let to_originator = joiner.encrypt(b"0xdeadbeef").unwrap();
            assert_eq!(originator.decrypt(&to_originator).unwrap(), b"0xdeadbeef");
        }
    }

    #[test]
    fn test_pre_exchange_rejection() {
        let exchange = KeyExchange::new(CipherScheme::SharedSecret);

        for result in [exchange.encrypt(b"data"), exchange.decrypt(b"data")] {
            match result {
                Err(PairlinkError::Crypto(CryptoError::KeysNotExchanged)) => {}
                other => panic!("expected KeysNotExchanged, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_mid_handshake_rejection() {
        let mut originator = KeyExchange::new(CipherScheme::SharedSecret);
        originator.start().unwrap();

        // SYN sent but no SYNACK yet: still not exchanged.
        assert!(originator.encrypt(b"too early").is_err());
    }

    #[test]
    fn test_handshake_idempotence() {
        let (mut originator, mut joiner) = exchanged_pair(CipherScheme::SharedSecret);
        let secret_before = originator.shared_secret;

        // Redeliver every handshake message; nothing may change.
        let redeliveries = [
            HandshakeMessage::Syn {
                pubkey: Some(joiner.public_key_hex()),
            },
            HandshakeMessage::SynAck {
                pubkey: Some(joiner.public_key_hex()),
            },
            HandshakeMessage::Ack,
        ];
        for message in redeliveries {
            let outcome = originator.handle_message(message.clone()).unwrap();
            assert!(!outcome.completed);
            assert!(outcome.reply.is_none());
            let outcome = joiner.handle_message(message).unwrap();
            assert!(!outcome.completed);
        }

        assert_eq!(originator.shared_secret, secret_before);
    }

    #[test]
    fn test_out_of_order_is_hard_error() {
        let mut exchange = KeyExchange::new(CipherScheme::SharedSecret);

        // ACK without any prior traffic is a protocol violation.
        let err = exchange.handle_message(HandshakeMessage::Ack).unwrap_err();
        assert!(err.is_protocol_violation());

        // As is a second start().
        exchange.start().unwrap();
        assert!(exchange.start().is_err());
    }

    #[test]
    fn test_deeplink_key_repeated_in_syn() {
        let mut originator = KeyExchange::new(CipherScheme::SharedSecret);
        let mut joiner = KeyExchange::with_other_public_key(
            CipherScheme::SharedSecret,
            parse_public_key(&originator.public_key_hex()).unwrap(),
        );

        // SYN repeats the key the joiner already has; accepted.
        let syn = originator.start().unwrap();
        assert!(joiner.handle_message(syn).is_ok());
    }

    #[test]
    fn test_key_substitution_rejected() {
        let originator = KeyExchange::new(CipherScheme::SharedSecret);
        let imposter = KeyExchange::new(CipherScheme::SharedSecret);
        let mut joiner = KeyExchange::with_other_public_key(
            CipherScheme::SharedSecret,
            parse_public_key(&originator.public_key_hex()).unwrap(),
        );

        let forged_syn = HandshakeMessage::Syn {
            pubkey: Some(imposter.public_key_hex()),
        };
        assert!(joiner.handle_message(forged_syn).is_err());
    }

    #[test]
    fn test_reset_regenerates_keys() {
        let (mut originator, _) = exchanged_pair(CipherScheme::SharedSecret);
        let old_public = originator.public_key_hex();

        originator.reset();

        assert_eq!(originator.step(), HandshakeStep::None);
        assert!(originator.shared_secret.is_none());
        assert_ne!(originator.public_key_hex(), old_public);
    }
}
