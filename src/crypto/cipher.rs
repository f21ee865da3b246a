//! Payload sealing for the encrypted channel.
//!
//! Two sealing shapes are supported behind one interface, selectable per
//! deployment:
//!
//! - [`CipherScheme::SharedSecret`]: a symmetric secret is derived once via
//!   ECDH during the handshake and every payload is sealed under it with
//!   ChaCha20-Poly1305.
//! - [`CipherScheme::Ecies`]: every payload is sealed to the peer's public
//!   key with a fresh ephemeral key (Integrated Encryption Scheme); no
//!   long-lived symmetric state exists.
//!
//! Either way, no plaintext application payload ever crosses the relay.

use crate::crypto::keys::SHARED_SECRET_SIZE;
use crate::utils::{CryptoError, Result};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

/// ChaCha20-Poly1305 nonce length in bytes
const NONCE_SIZE: usize = 12;

/// X25519 public key length in bytes
const PUBLIC_KEY_SIZE: usize = 32;

/// HKDF info string for per-message ECIES keys
const ECIES_INFO: &[u8] = b"pairlink-ecies-v1";

/// Sealing shape for application payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherScheme {
    /// Derive one symmetric secret during the handshake, then symmetric AEAD
    SharedSecret,
    /// Seal each payload to the peer public key with a fresh ephemeral key
    Ecies,
}

/// Seal a payload under the channel's derived symmetric secret.
///
/// Output layout: `nonce (12) || ciphertext`.
pub fn seal_symmetric(key: &[u8; SHARED_SECRET_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encryption {
            reason: "symmetric seal failed".to_string(),
        })?;

    let mut result = nonce.to_vec();
    result.append(&mut ciphertext);
    Ok(result)
}

/// Open a payload sealed with [`seal_symmetric`]
pub fn open_symmetric(key: &[u8; SHARED_SECRET_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return Err(CryptoError::Decryption {
            reason: "sealed payload too short".to_string(),
        }
        .into());
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);

    cipher
        .decrypt(nonce, &sealed[NONCE_SIZE..])
        .map_err(|_| {
            CryptoError::Decryption {
                reason: "symmetric open failed".to_string(),
            }
            .into()
        })
}

/// Seal a payload to `recipient` with a fresh ephemeral key (ECIES).
///
/// Output layout: `ephemeral public key (32) || nonce (12) || ciphertext`.
pub fn seal_ecies(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let key = derive_ecies_key(&ephemeral, recipient)?;
    let cipher = ChaCha20Poly1305::new(&key.into());
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encryption {
            reason: "ECIES seal failed".to_string(),
        })?;

    let mut result = ephemeral_public.as_bytes().to_vec();
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);
    Ok(result)
}

/// Open a payload sealed with [`seal_ecies`] using the local private key
pub fn open_ecies(secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < PUBLIC_KEY_SIZE + NONCE_SIZE {
        return Err(CryptoError::Decryption {
            reason: "sealed payload too short".to_string(),
        }
        .into());
    }

    let mut ephemeral_bytes = [0u8; PUBLIC_KEY_SIZE];
    ephemeral_bytes.copy_from_slice(&sealed[..PUBLIC_KEY_SIZE]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);

    let key = derive_ecies_key(secret, &ephemeral_public)?;
    let cipher = ChaCha20Poly1305::new(&key.into());
    let nonce = Nonce::from_slice(&sealed[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NONCE_SIZE]);

    cipher
        .decrypt(nonce, &sealed[PUBLIC_KEY_SIZE + NONCE_SIZE..])
        .map_err(|_| {
            CryptoError::Decryption {
                reason: "ECIES open failed".to_string(),
            }
            .into()
        })
}

fn derive_ecies_key(
    secret: &StaticSecret,
    public: &PublicKey,
) -> Result<[u8; SHARED_SECRET_SIZE]> {
    let dh = secret.diffie_hellman(public);

    let hkdf = Hkdf::<Sha256>::new(None, dh.as_bytes());
    let mut key = [0u8; SHARED_SECRET_SIZE];
    hkdf.expand(ECIES_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivation {
            reason: "HKDF expansion failed".to_string(),
        })?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChannelKeyPair;

    #[test]
    fn test_symmetric_round_trip() {
        let key = [7u8; SHARED_SECRET_SIZE];
        let plaintext = b"eth_requestAccounts";

        let sealed = seal_symmetric(&key, plaintext).unwrap();
        let opened = open_symmetric(&key, &sealed).unwrap();

        assert_eq!(opened, plaintext);
        assert_ne!(&sealed[NONCE_SIZE..], plaintext.as_slice());
    }

    #[test]
    fn test_symmetric_wrong_key_fails() {
        let sealed = seal_symmetric(&[1u8; SHARED_SECRET_SIZE], b"payload").unwrap();
        assert!(open_symmetric(&[2u8; SHARED_SECRET_SIZE], &sealed).is_err());
    }

    #[test]
    fn test_symmetric_truncated_fails() {
        let key = [3u8; SHARED_SECRET_SIZE];
        assert!(open_symmetric(&key, &[0u8; 4]).is_err());
    }

    #[test]
    fn test_ecies_round_trip() {
        let recipient = ChannelKeyPair::generate();
        let plaintext = b"personal_sign";

        let sealed = seal_ecies(recipient.public_key(), plaintext).unwrap();
        let opened = open_ecies(recipient.secret(), &sealed).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_ecies_fresh_ephemeral_per_message() {
        let recipient = ChannelKeyPair::generate();

        let a = seal_ecies(recipient.public_key(), b"same").unwrap();
        let b = seal_ecies(recipient.public_key(), b"same").unwrap();

        // The ephemeral key prefix must differ between two seals.
        assert_ne!(a[..PUBLIC_KEY_SIZE], b[..PUBLIC_KEY_SIZE]);
    }

    #[test]
    fn test_ecies_wrong_recipient_fails() {
        let recipient = ChannelKeyPair::generate();
        let eavesdropper = ChannelKeyPair::generate();

        let sealed = seal_ecies(recipient.public_key(), b"secret").unwrap();
        assert!(open_ecies(eavesdropper.secret(), &sealed).is_err());
    }

    #[test]
    fn test_scheme_serde_names() {
        assert_eq!(
            serde_json::to_string(&CipherScheme::SharedSecret).unwrap(),
            "\"shared_secret\""
        );
        assert_eq!(
            serde_json::to_string(&CipherScheme::Ecies).unwrap(),
            "\"ecies\""
        );
    }
}
