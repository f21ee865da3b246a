//! Cryptographic primitives: ephemeral key pairs, ECDH secret derivation,
//! and the two payload-sealing shapes (derived-symmetric and ECIES).

pub mod cipher;
pub mod keys;

pub use cipher::{open_ecies, open_symmetric, seal_ecies, seal_symmetric, CipherScheme};
pub use keys::{parse_public_key, ChannelKeyPair, SHARED_SECRET_SIZE};
