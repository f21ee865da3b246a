//! Relay wire protocol definitions and serialization.
//!
//! The relay speaks newline-delimited JSON over a persistent bidirectional
//! TCP socket. Requests and events are explicit tagged enums rather than
//! string-suffixed event names; the channel id rides in the payload. The
//! relay never inspects message payloads: they are opaque strings (cleartext
//! JSON during the handshake, base64 ciphertext afterwards).

use crate::utils::{RelayError, Result};
use serde::{Deserialize, Serialize};
use uuid::{Uuid, Version};

/// Error string for a join attempt on a room that already has two members
pub const ERR_ROOM_FULL: &str = "room already full";

/// Error string for creating a channel whose room is already occupied
pub const ERR_ROOM_EXISTS: &str = "room already created";

/// Error string for malformed channel identifiers
pub const ERR_INVALID_ID: &str = "must specify a valid id";

/// Request sent from a relay client to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Register a new room under a client-generated channel id
    CreateChannel {
        /// Channel identifier (must be a UUID v4)
        channel_id: String,
    },
    /// Join an existing room
    JoinChannel {
        /// Channel identifier
        channel_id: String,
    },
    /// Relay an opaque payload to the other room member
    Message {
        /// Channel identifier
        channel_id: String,
        /// Opaque payload; the relay never inspects it
        payload: String,
    },
    /// Leave a room, notifying the remaining member
    LeaveChannel {
        /// Channel identifier
        channel_id: String,
    },
    /// Probe the current occupancy of a room
    CheckRoom {
        /// Channel identifier
        channel_id: String,
    },
    /// Connectivity probe
    Ping {
        /// Channel identifier
        channel_id: String,
    },
}

/// Event pushed from the relay server to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The requested room now exists with the creator as sole member
    ChannelCreated {
        /// Channel identifier
        channel_id: String,
    },
    /// Joined a room that is still waiting for its second member
    ClientsWaiting {
        /// Channel identifier
        channel_id: String,
        /// Current room occupancy
        count: usize,
    },
    /// The room reached exactly two members
    ClientsConnected {
        /// Channel identifier
        channel_id: String,
    },
    /// The other member left or dropped
    ClientsDisconnected {
        /// Channel identifier
        channel_id: String,
    },
    /// Relayed payload from the other room member
    Message {
        /// Channel identifier
        channel_id: String,
        /// Opaque payload, unmodified
        payload: String,
    },
    /// Occupancy answer to a `check_room` probe
    RoomOccupancy {
        /// Channel identifier
        channel_id: String,
        /// Current room occupancy
        occupancy: usize,
    },
    /// Answer to a `ping` probe
    Pong {
        /// Channel identifier
        channel_id: String,
    },
    /// Validation failure or room-level error
    Error {
        /// Channel the error refers to, when known
        channel_id: Option<String>,
        /// Error description
        error: String,
    },
}

impl ClientRequest {
    /// The channel id this request refers to
    pub fn channel_id(&self) -> &str {
        match self {
            Self::CreateChannel { channel_id }
            | Self::JoinChannel { channel_id }
            | Self::Message { channel_id, .. }
            | Self::LeaveChannel { channel_id }
            | Self::CheckRoom { channel_id }
            | Self::Ping { channel_id } => channel_id,
        }
    }

    /// Serialize to one wire line (newline not included)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one wire line
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

impl ServerEvent {
    /// Serialize to one wire line (newline not included)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one wire line
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Validate a channel identifier: well-formed UUID v4, nothing else.
pub fn validate_channel_id(channel_id: &str) -> Result<Uuid> {
    let parsed = Uuid::parse_str(channel_id).map_err(|_| RelayError::InvalidChannelId {
        channel_id: channel_id.to_string(),
    })?;

    if parsed.get_version() != Some(Version::Random) {
        return Err(RelayError::InvalidChannelId {
            channel_id: channel_id.to_string(),
        }
        .into());
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = ClientRequest::JoinChannel {
            channel_id: "c1".to_string(),
        };
        let line = request.to_line().unwrap();

        assert!(line.contains("\"type\":\"join_channel\""));
        assert_eq!(ClientRequest::from_line(&line).unwrap(), request);
    }

    #[test]
    fn test_event_wire_format() {
        let event = ServerEvent::ClientsWaiting {
            channel_id: "c1".to_string(),
            count: 1,
        };
        let line = event.to_line().unwrap();

        assert!(line.contains("\"type\":\"clients_waiting\""));
        assert_eq!(ServerEvent::from_line(&line).unwrap(), event);
    }

    #[test]
    fn test_payload_passes_through_verbatim() {
        let payload = "eyJvcGFxdWUiOiJjaXBoZXJ0ZXh0In0=";
        let event = ServerEvent::Message {
            channel_id: "c1".to_string(),
            payload: payload.to_string(),
        };
        let round_tripped = ServerEvent::from_line(&event.to_line().unwrap()).unwrap();

        match round_tripped {
            ServerEvent::Message { payload: p, .. } => assert_eq!(p, payload),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_channel_id_validation() {
        assert!(validate_channel_id(&Uuid::new_v4().to_string()).is_ok());
        assert!(validate_channel_id("not-a-uuid").is_err());
        assert!(validate_channel_id("").is_err());
        // UUID v1 (time-based) is rejected; the relay demands v4.
        assert!(validate_channel_id("c232271b-8e1e-11ee-b9d1-0242ac120002").is_err());
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(ClientRequest::from_line("{\"type\":\"unknown\"}").is_err());
        assert!(ServerEvent::from_line("not json").is_err());
    }
}
