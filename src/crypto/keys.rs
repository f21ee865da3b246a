//! Ephemeral channel key pairs and shared-secret derivation.
//!
//! Every pairing attempt gets a fresh X25519 key pair; the two peers derive
//! one symmetric secret from ECDH over the out-of-band-exchanged public keys.
//! Key pairs are never reused across pairings, which is why session
//! persistence resumes the rendezvous but always re-runs the key exchange.

use crate::utils::{CryptoError, Result};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

/// Size of the derived shared secret
pub const SHARED_SECRET_SIZE: usize = 32;

/// HKDF info string for shared-secret derivation
const SHARED_SECRET_INFO: &[u8] = b"pairlink-channel-v1";

/// An ephemeral X25519 key pair scoped to one pairing attempt
pub struct ChannelKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ChannelKeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public half of this key pair
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The public key, hex-encoded for the QR/deeplink payload
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Borrow the private half for ECIES decryption
    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Derive the symmetric channel secret shared with `other`.
    ///
    /// ECDH over the two key pairs followed by HKDF-SHA256; both peers
    /// derive byte-identical output.
    pub fn derive_shared_secret(&self, other: &PublicKey) -> Result<[u8; SHARED_SECRET_SIZE]> {
        let dh = self.secret.diffie_hellman(other);

        let hkdf = Hkdf::<Sha256>::new(None, dh.as_bytes());
        let mut shared_secret = [0u8; SHARED_SECRET_SIZE];
        hkdf.expand(SHARED_SECRET_INFO, &mut shared_secret)
            .map_err(|_| CryptoError::KeyDerivation {
                reason: "HKDF expansion failed".to_string(),
            })?;

        Ok(shared_secret)
    }
}

impl std::fmt::Debug for ChannelKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the private half.
        f.debug_struct("ChannelKeyPair")
            .field("public", &self.public_key_hex())
            .finish()
    }
}

/// Parse a hex-encoded X25519 public key received from the peer
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKey {
        reason: format!("public key is not valid hex: {hex_key}"),
    })?;

    let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
        reason: "public key must be 32 bytes".to_string(),
    })?;

    Ok(PublicKey::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_agreement() {
        let alice = ChannelKeyPair::generate();
        let bob = ChannelKeyPair::generate();

        let alice_secret = alice.derive_shared_secret(bob.public_key()).unwrap();
        let bob_secret = bob.derive_shared_secret(alice.public_key()).unwrap();

        assert_eq!(alice_secret, bob_secret);
    }

    #[test]
    fn test_distinct_pairings_distinct_secrets() {
        let alice = ChannelKeyPair::generate();
        let bob = ChannelKeyPair::generate();
        let carol = ChannelKeyPair::generate();

        let with_bob = alice.derive_shared_secret(bob.public_key()).unwrap();
        let with_carol = alice.derive_shared_secret(carol.public_key()).unwrap();

        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let keypair = ChannelKeyPair::generate();
        let parsed = parse_public_key(&keypair.public_key_hex()).unwrap();
        assert_eq!(parsed.as_bytes(), keypair.public_key().as_bytes());
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(parse_public_key("not hex").is_err());
        assert!(parse_public_key("deadbeef").is_err());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let keypair = ChannelKeyPair::generate();
        let debug = format!("{keypair:?}");
        assert!(debug.contains(&keypair.public_key_hex()));
    }
}
