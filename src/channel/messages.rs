//! Application-layer message envelope carried over the relay.
//!
//! Handshake messages (`key_handshake_*`) travel in cleartext because they
//! exist to establish the keys; everything after the handshake is the JSON
//! serialization of a [`ChannelMessage`] sealed by the key exchange and
//! base64-encoded into the relay's opaque payload string.

use crate::keyexchange::HandshakeMessage;
use crate::utils::Result;
use serde::{Deserialize, Serialize};

/// Metadata the dapp sends once after the channel links
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginatorInfo {
    /// Dapp URL
    pub url: String,
    /// Dapp display title
    pub title: String,
    /// Host platform identifier
    pub platform: String,
    /// SDK/protocol version string
    pub sdk_version: String,
}

/// Metadata the wallet sends in answer to [`OriginatorInfo`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Wallet display name
    pub name: String,
    /// Wallet version string
    pub version: String,
    /// Host platform identifier
    pub platform: String,
}

/// Everything that can travel between the two peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    /// Handshake open (cleartext)
    #[serde(rename = "key_handshake_SYN")]
    KeyHandshakeSyn {
        /// Sender's hex-encoded ephemeral public key
        #[serde(skip_serializing_if = "Option::is_none")]
        pubkey: Option<String>,
    },
    /// Handshake answer (cleartext)
    #[serde(rename = "key_handshake_SYNACK")]
    KeyHandshakeSynAck {
        /// Sender's hex-encoded ephemeral public key
        #[serde(skip_serializing_if = "Option::is_none")]
        pubkey: Option<String>,
    },
    /// Handshake close (cleartext)
    #[serde(rename = "key_handshake_ACK")]
    KeyHandshakeAck,
    /// Dapp metadata, sent once after linking (encrypted)
    #[serde(rename = "originator_info")]
    OriginatorInfo {
        /// The dapp's metadata
        originator_info: OriginatorInfo,
    },
    /// Wallet metadata, answering `originator_info` (encrypted)
    #[serde(rename = "wallet_info")]
    WalletInfo {
        /// The wallet's metadata
        wallet_info: WalletInfo,
    },
    /// Non-originator signals it is ready for traffic (encrypted)
    #[serde(rename = "ready")]
    Ready,
    /// Sender is backgrounding; channel parks until resume (encrypted)
    #[serde(rename = "pause")]
    Pause,
    /// Sender is tearing the pairing down for good (encrypted)
    #[serde(rename = "terminate")]
    Terminate,
    /// Application payload, base64-encoded (encrypted)
    #[serde(rename = "message")]
    Application {
        /// Base64-encoded application bytes
        data: String,
    },
}

impl ChannelMessage {
    /// Wrap raw application bytes
    pub fn application(payload: &[u8]) -> Self {
        use base64::{engine::general_purpose, Engine};
        Self::Application {
            data: general_purpose::STANDARD.encode(payload),
        }
    }

    /// Unwrap raw application bytes
    pub fn application_payload(&self) -> Result<Option<Vec<u8>>> {
        use base64::{engine::general_purpose, Engine};
        match self {
            Self::Application { data } => Ok(Some(general_purpose::STANDARD.decode(data)?)),
            _ => Ok(None),
        }
    }

    /// Serialize for the relay's opaque payload slot
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the relay's opaque payload slot
    pub fn from_wire(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// View as a handshake message, when it is one
    pub fn as_handshake(&self) -> Option<HandshakeMessage> {
        match self {
            Self::KeyHandshakeSyn { pubkey } => Some(HandshakeMessage::Syn {
                pubkey: pubkey.clone(),
            }),
            Self::KeyHandshakeSynAck { pubkey } => Some(HandshakeMessage::SynAck {
                pubkey: pubkey.clone(),
            }),
            Self::KeyHandshakeAck => Some(HandshakeMessage::Ack),
            _ => None,
        }
    }
}

impl From<HandshakeMessage> for ChannelMessage {
    fn from(message: HandshakeMessage) -> Self {
        match message {
            HandshakeMessage::Syn { pubkey } => Self::KeyHandshakeSyn { pubkey },
            HandshakeMessage::SynAck { pubkey } => Self::KeyHandshakeSynAck { pubkey },
            HandshakeMessage::Ack => Self::KeyHandshakeAck,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_wire_names() {
        let syn = ChannelMessage::KeyHandshakeSyn {
            pubkey: Some("aa".to_string()),
        };
        let wire = syn.to_wire().unwrap();
        assert!(wire.contains("\"type\":\"key_handshake_SYN\""));

        let ack = ChannelMessage::KeyHandshakeAck.to_wire().unwrap();
        assert!(ack.contains("\"type\":\"key_handshake_ACK\""));
    }

    #[test]
    fn test_syn_without_key_omits_field() {
        let syn = ChannelMessage::KeyHandshakeSyn { pubkey: None };
        assert!(!syn.to_wire().unwrap().contains("pubkey"));
    }

    #[test]
    fn test_application_payload_round_trip() {
        let message = ChannelMessage::application(b"\x00binary\xffpayload");
        let wire = message.to_wire().unwrap();
        let parsed = ChannelMessage::from_wire(&wire).unwrap();

        assert_eq!(
            parsed.application_payload().unwrap().unwrap(),
            b"\x00binary\xffpayload"
        );
    }

    #[test]
    fn test_handshake_conversion_round_trip() {
        let messages = [
            ChannelMessage::KeyHandshakeSyn {
                pubkey: Some("ab".to_string()),
            },
            ChannelMessage::KeyHandshakeSynAck { pubkey: None },
            ChannelMessage::KeyHandshakeAck,
        ];

        for message in messages {
            let handshake = message.as_handshake().unwrap();
            assert_eq!(ChannelMessage::from(handshake), message);
        }

        assert!(ChannelMessage::Ready.as_handshake().is_none());
    }

    #[test]
    fn test_info_messages_parse() {
        let wire = ChannelMessage::OriginatorInfo {
            originator_info: OriginatorInfo {
                url: "https://dapp.example".to_string(),
                title: "Example Dapp".to_string(),
                platform: "web".to_string(),
                sdk_version: "0.1.0".to_string(),
            },
        }
        .to_wire()
        .unwrap();

        assert!(wire.contains("\"type\":\"originator_info\""));
        match ChannelMessage::from_wire(&wire).unwrap() {
            ChannelMessage::OriginatorInfo { originator_info } => {
                assert_eq!(originator_info.title, "Example Dapp");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
