//! Channel lifecycle state machine.
//!
//! The machine is pure: [`ChannelStateMachine::handle`] maps an event to a
//! new state plus a list of [`Effect`]s for the caller to execute. No I/O,
//! no timers, no locks live here, which keeps every transition unit-testable.

use std::fmt;

/// Lifecycle of a secure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No relay room joined yet
    Disconnected,
    /// Joined the room, waiting for the second member
    WaitingForPeer,
    /// Both members present, handshake in flight
    KeyExchanging,
    /// Keys established, traffic flows
    Linked,
    /// Peer went away or backgrounded; recoverable
    Paused,
    /// The peer never showed up within the waiting window
    Timeout,
    /// Torn down for good
    Terminated,
}

impl ConnectionState {
    /// Whether the channel can never leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Timeout | Self::Terminated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::WaitingForPeer => "waiting_for_peer",
            Self::KeyExchanging => "key_exchanging",
            Self::Linked => "linked",
            Self::Paused => "paused",
            Self::Timeout => "timeout",
            Self::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The local side created or joined a relay room
    ConnectRequested,
    /// The relay reported the second member arriving
    PeerConnected,
    /// The key exchange completed
    KeysExchanged,
    /// The relay reported the peer leaving, or the relay link dropped
    PeerDisconnected,
    /// The waiting window elapsed without a peer
    WaitingTimerFired,
    /// A pause was requested locally or received from the peer
    PauseRequested {
        /// Whether the local side initiated the pause
        local: bool,
    },
    /// The local side wants to rejoin after a pause
    ResumeRequested,
    /// The local side is disconnecting for good, without forgetting the session
    DisconnectRequested,
    /// The pairing is being destroyed, locally or by the peer
    TerminateRequested {
        /// Whether the local side initiated the teardown
        local: bool,
    },
}

/// Actions the caller must carry out after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start the waiting-for-peer timer
    ArmWaitingTimer,
    /// Discard handshake state so the link re-pairs with fresh keys
    ResetKeyExchange,
    /// Invalidate any pending waiting timer
    DisarmWaitingTimer,
    /// Originator side: emit the handshake SYN
    StartKeyExchange,
    /// Deliver messages queued before the link came up
    FlushQueue,
    /// Write the channel config to the session store
    PersistSession,
    /// Non-originator: tell the peer we are ready for traffic
    SendReady,
    /// Originator: send dapp metadata to the peer
    SendOriginatorInfo,
    /// Tell the peer we are pausing
    SendPause,
    /// Tell the peer the pairing is over
    SendTerminate,
    /// Rejoin the relay room for this channel
    RejoinChannel,
    /// Leave the relay room
    LeaveChannel,
    /// Forget the persisted session
    ClearSession,
}

/// Pure transition function over [`ConnectionState`]
#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: ConnectionState,
    is_originator: bool,
    originator_info_sent: bool,
}

impl ChannelStateMachine {
    /// Create a machine in [`ConnectionState::Disconnected`]
    pub fn new(is_originator: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            is_originator,
            originator_info_sent: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether this side created the channel
    pub fn is_originator(&self) -> bool {
        self.is_originator
    }

    /// Whether the originator metadata already went out on this link
    pub fn originator_info_sent(&self) -> bool {
        self.originator_info_sent
    }

    /// Mark the originator metadata as delivered
    pub fn mark_originator_info_sent(&mut self) {
        self.originator_info_sent = true;
    }

    /// Apply one event, returning the effects the caller must execute.
    ///
    /// Events that make no sense in the current state are ignored (the state
    /// is unchanged and no effects are produced); terminal states absorb
    /// everything.
    pub fn handle(&mut self, event: ChannelEvent) -> Vec<Effect> {
        use ChannelEvent::*;
        use ConnectionState::*;

        if self.state.is_terminal() {
            return Vec::new();
        }

        match (self.state, event) {
            (Disconnected | Paused, ConnectRequested) => {
                self.state = WaitingForPeer;
                vec![Effect::ArmWaitingTimer]
            }
            (WaitingForPeer, PeerConnected) => {
                self.state = KeyExchanging;
                let mut effects = vec![Effect::DisarmWaitingTimer];
                if self.is_originator {
                    effects.push(Effect::StartKeyExchange);
                }
                effects
            }
            // A peer arriving while paused means the other side reconnected;
            // the old link's keys must not carry over.
            (Paused, PeerConnected) => {
                self.state = KeyExchanging;
                let mut effects = vec![Effect::DisarmWaitingTimer, Effect::ResetKeyExchange];
                if self.is_originator {
                    effects.push(Effect::StartKeyExchange);
                }
                effects
            }
            (KeyExchanging, KeysExchanged) => {
                self.state = Linked;
                let mut effects = vec![Effect::PersistSession];
                if self.is_originator {
                    effects.push(Effect::SendOriginatorInfo);
                } else {
                    effects.push(Effect::SendReady);
                }
                effects.push(Effect::FlushQueue);
                effects
            }
            (WaitingForPeer, WaitingTimerFired) => {
                self.state = Timeout;
                vec![Effect::LeaveChannel]
            }
            (WaitingForPeer | KeyExchanging | Linked, PeerDisconnected) => {
                self.state = Paused;
                vec![Effect::DisarmWaitingTimer]
            }
            (Linked, PauseRequested { local }) => {
                self.state = Paused;
                if local {
                    vec![Effect::SendPause]
                } else {
                    Vec::new()
                }
            }
            (Paused, ResumeRequested) => {
                self.state = WaitingForPeer;
                vec![Effect::RejoinChannel, Effect::ArmWaitingTimer]
            }
            (_, DisconnectRequested) => {
                self.state = Terminated;
                vec![Effect::DisarmWaitingTimer, Effect::LeaveChannel]
            }
            (_, TerminateRequested { local }) => {
                self.state = Terminated;
                let mut effects = vec![Effect::DisarmWaitingTimer];
                if local {
                    effects.push(Effect::SendTerminate);
                }
                effects.push(Effect::LeaveChannel);
                effects.push(Effect::ClearSession);
                effects
            }
            // Stale timers, duplicate relay notifications and the like
            _ => Vec::new(),
        }
    }
}
