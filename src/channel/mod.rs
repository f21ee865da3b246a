//! Secure channel lifecycle: message envelope, state machine, and the
//! driver tying them to the relay and the key exchange.

pub mod messages;
pub mod secure;
pub mod state;

pub use messages::{ChannelMessage, OriginatorInfo, WalletInfo};
pub use secure::{
    ChannelMetadata, ChannelNotification, NotificationKind, PairingInfo, PeerInfo, SecureChannel,
};
pub use state::{ChannelEvent, ChannelStateMachine, ConnectionState, Effect};
