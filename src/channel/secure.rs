//! End-to-end encrypted channel over the relay.
//!
//! [`SecureChannel`] ties the pieces together: a [`RelayClient`] for
//! transport, a [`KeyExchange`] for the handshake and payload sealing, a
//! [`SessionStore`] for resumable pairings, and the pure
//! [`ChannelStateMachine`] deciding what happens on each event. A driver
//! task consumes relay events and internal timer firings; public methods
//! and the driver both funnel through the state machine, so ordering is
//! serialized by a single lock that is never held across an await.

use crate::channel::messages::{ChannelMessage, OriginatorInfo, WalletInfo};
use crate::channel::state::{ChannelEvent, ChannelStateMachine, ConnectionState, Effect};
use crate::crypto::{parse_public_key, CipherScheme};
use crate::keyexchange::KeyExchange;
use crate::relay::{RelayClient, RelayEvent};
use crate::session::{ChannelConfig, SessionStore};
use crate::utils::{ChannelError, PairlinkConfig, Result};
use base64::{engine::general_purpose, Engine};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What the originator surfaces out-of-band (QR code, deeplink) so the
/// peer can join and open the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingInfo {
    /// Relay room to join
    pub channel_id: Uuid,
    /// Originator's hex-encoded public key
    pub public_key: String,
}

/// Peer metadata received during the post-link exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerInfo {
    /// The peer is the dapp side
    Originator(OriginatorInfo),
    /// The peer is the wallet side
    Wallet(WalletInfo),
}

/// What happened, for the notification stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// The lifecycle state changed
    StateChanged,
    /// Joined the room, still alone in it
    ClientsWaiting {
        /// Current occupancy
        count: usize,
    },
    /// The handshake completed; traffic can flow
    KeysExchanged,
    /// The peer identified itself after linking
    ClientsReady {
        /// The peer's metadata
        peer: PeerInfo,
    },
    /// Decrypted application payload from the peer
    Message {
        /// Application bytes
        payload: Vec<u8>,
    },
    /// The relay rejected a request or the room was full
    Error {
        /// Error description
        error: String,
    },
}

/// One entry on the channel's notification stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNotification {
    /// What happened
    pub kind: NotificationKind,
    /// Lifecycle state after the event
    pub state: ConnectionState,
}

/// Local metadata for the post-link identification exchange
#[derive(Debug, Clone, Default)]
pub struct ChannelMetadata {
    /// Sent by the originator side after linking
    pub originator_info: OriginatorInfo,
    /// Sent by the wallet side in answer to `originator_info`
    pub wallet_info: WalletInfo,
}

#[derive(Debug, Clone, Copy)]
enum InternalEvent {
    TimerFired { generation: u64 },
    /// Wakes the driver so it can observe a terminal state and exit
    Shutdown,
}

struct ChannelRuntime {
    machine: ChannelStateMachine,
    exchange: KeyExchange,
    relay: RelayClient,
    store: Box<dyn SessionStore>,
    metadata: ChannelMetadata,
    scheme: CipherScheme,
    channel_id: Option<Uuid>,
    queue: VecDeque<Vec<u8>>,
    max_queued: usize,
    waiting_timeout: Duration,
    session_duration_ms: u64,
    // Bumping the generation invalidates every timer spawned before the bump
    timer_generation: u64,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    notify_tx: mpsc::UnboundedSender<ChannelNotification>,
}

/// A paired, end-to-end encrypted channel between two peers
pub struct SecureChannel {
    runtime: Arc<Mutex<ChannelRuntime>>,
}

impl SecureChannel {
    /// Connect to the relay and set up an unpaired channel.
    ///
    /// Returns the channel handle and its notification stream. Pairing
    /// starts with [`generate_channel_id_connect`](Self::generate_channel_id_connect)
    /// (originator), [`connect_to_channel`](Self::connect_to_channel)
    /// (joiner), or [`resume_session`](Self::resume_session).
    pub async fn new(
        config: &PairlinkConfig,
        metadata: ChannelMetadata,
        store: Box<dyn SessionStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelNotification>)> {
        let (relay, relay_rx) = RelayClient::connect(&config.relay.server_url).await?;
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let runtime = Arc::new(Mutex::new(ChannelRuntime {
            machine: ChannelStateMachine::new(false),
            exchange: KeyExchange::new(config.crypto.scheme),
            relay,
            store,
            metadata,
            scheme: config.crypto.scheme,
            channel_id: None,
            queue: VecDeque::new(),
            max_queued: config.session.max_queued_messages,
            waiting_timeout: Duration::from_millis(config.session.waiting_timeout_ms),
            session_duration_ms: config.session.session_duration_ms,
            timer_generation: 0,
            internal_tx,
            notify_tx,
        }));

        tokio::spawn(drive(Arc::clone(&runtime), relay_rx, internal_rx));

        Ok((Self { runtime }, notify_rx))
    }

    fn runtime(&self) -> MutexGuard<'_, ChannelRuntime> {
        self.runtime.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Originator side: mint a fresh channel, create its relay room, and
    /// return what the peer needs to join.
    pub fn generate_channel_id_connect(&self) -> Result<PairingInfo> {
        let mut runtime = self.runtime();
        runtime.check_unpaired("generate_channel_id_connect")?;

        let channel_id = Uuid::new_v4();
        runtime.machine = ChannelStateMachine::new(true);
        runtime.exchange = KeyExchange::new(runtime.scheme);
        runtime.channel_id = Some(channel_id);
        runtime.relay.create_channel(channel_id)?;
        runtime.apply(ChannelEvent::ConnectRequested);

        info!("created channel {channel_id}");
        Ok(PairingInfo {
            channel_id,
            public_key: runtime.exchange.public_key_hex(),
        })
    }

    /// Joiner side: connect to a channel advertised out-of-band.
    ///
    /// The originator's public key from the pairing payload seeds the key
    /// exchange, so the joiner can answer the SYN immediately.
    pub fn connect_to_channel(&self, channel_id: Uuid, other_public_key: &str) -> Result<()> {
        let mut runtime = self.runtime();
        runtime.check_unpaired("connect_to_channel")?;

        let other = parse_public_key(other_public_key)?;
        runtime.machine = ChannelStateMachine::new(false);
        runtime.exchange = KeyExchange::with_other_public_key(runtime.scheme, other);
        runtime.channel_id = Some(channel_id);
        runtime.relay.join_channel(channel_id)?;
        runtime.apply(ChannelEvent::ConnectRequested);

        info!("joining channel {channel_id}");
        Ok(())
    }

    /// Originator side: rejoin a previously persisted channel.
    ///
    /// Only the rendezvous is reused; the key exchange always runs again
    /// with fresh ephemeral keys. Returns `None` when no live session is
    /// stored.
    pub fn resume_session(&self) -> Result<Option<PairingInfo>> {
        let mut runtime = self.runtime();
        runtime.check_unpaired("resume_session")?;

        let Some(session) = runtime.store.load()? else {
            return Ok(None);
        };

        let channel_id = session.channel_id;
        runtime.machine = ChannelStateMachine::new(true);
        runtime.exchange = KeyExchange::new(runtime.scheme);
        runtime.channel_id = Some(channel_id);
        runtime.relay.join_channel(channel_id)?;
        runtime.apply(ChannelEvent::ConnectRequested);

        info!("resuming channel {channel_id}");
        Ok(Some(PairingInfo {
            channel_id,
            public_key: runtime.exchange.public_key_hex(),
        }))
    }

    /// Send application bytes to the peer.
    ///
    /// Before the link is up the payload is queued (bounded, oldest dropped
    /// first) and flushed in order once keys are exchanged. After
    /// termination or timeout sending fails.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let mut runtime = self.runtime();
        match runtime.machine.state() {
            ConnectionState::Terminated => Err(ChannelError::Terminated.into()),
            ConnectionState::Timeout => Err(ChannelError::Timeout.into()),
            ConnectionState::Linked => {
                runtime.send_encrypted(&ChannelMessage::application(payload))
            }
            state => {
                if runtime.queue.len() >= runtime.max_queued {
                    runtime.queue.pop_front();
                    warn!("pre-link queue full, dropping oldest message");
                }
                runtime.queue.push_back(payload.to_vec());
                debug!(
                    "queued {} bytes in state {state} ({} pending)",
                    payload.len(),
                    runtime.queue.len()
                );
                Ok(())
            }
        }
    }

    /// Park the channel; the pairing survives and can be resumed
    pub fn pause(&self) -> Result<()> {
        let mut runtime = self.runtime();
        if runtime.machine.state() != ConnectionState::Linked {
            return Err(ChannelError::InvalidState {
                operation: "pause".to_string(),
                state: runtime.machine.state().to_string(),
            }
            .into());
        }
        runtime.apply(ChannelEvent::PauseRequested { local: true });
        Ok(())
    }

    /// Rejoin the relay room after a pause and re-run the key exchange
    pub fn resume(&self) -> Result<()> {
        let mut runtime = self.runtime();
        if runtime.machine.state() != ConnectionState::Paused {
            return Err(ChannelError::InvalidState {
                operation: "resume".to_string(),
                state: runtime.machine.state().to_string(),
            }
            .into());
        }
        runtime.exchange.reset();
        runtime.apply(ChannelEvent::ResumeRequested);
        Ok(())
    }

    /// Leave the channel for good, keeping the persisted session
    pub fn disconnect(&self) {
        self.runtime().apply(ChannelEvent::DisconnectRequested);
    }

    /// Destroy the pairing: notify the peer, leave the room, forget the
    /// persisted session
    pub fn terminate(&self) {
        self.runtime()
            .apply(ChannelEvent::TerminateRequested { local: true });
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.runtime().machine.state()
    }

    /// Channel identifier, once pairing started
    pub fn channel_id(&self) -> Option<Uuid> {
        self.runtime().channel_id
    }

    /// Whether traffic currently flows end-to-end encrypted
    pub fn is_linked(&self) -> bool {
        self.state() == ConnectionState::Linked
    }
}

async fn drive(
    runtime: Arc<Mutex<ChannelRuntime>>,
    mut relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
) {
    loop {
        let terminal = tokio::select! {
            event = relay_rx.recv() => match event {
                Some(event) => {
                    let mut runtime = runtime.lock().unwrap_or_else(|p| p.into_inner());
                    runtime.on_relay_event(event);
                    runtime.machine.state().is_terminal()
                }
                None => true,
            },
            event = internal_rx.recv() => match event {
                Some(InternalEvent::TimerFired { generation }) => {
                    let mut runtime = runtime.lock().unwrap_or_else(|p| p.into_inner());
                    runtime.on_timer(generation);
                    runtime.machine.state().is_terminal()
                }
                Some(InternalEvent::Shutdown) | None => true,
            },
        };
        if terminal {
            break;
        }
    }
    trace!("channel driver finished");
}

impl ChannelRuntime {
    fn check_unpaired(&self, operation: &str) -> Result<()> {
        if self.machine.state() != ConnectionState::Disconnected || self.channel_id.is_some() {
            return Err(ChannelError::InvalidState {
                operation: operation.to_string(),
                state: self.machine.state().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Run one event through the state machine and execute its effects
    fn apply(&mut self, event: ChannelEvent) {
        let before = self.machine.state();
        let effects = self.machine.handle(event);
        let after = self.machine.state();

        if before != after {
            debug!("channel state {before} -> {after} on {event:?}");
            self.notify(NotificationKind::StateChanged);
        }
        for effect in effects {
            self.run_effect(effect);
        }
        if after.is_terminal() && before != after {
            let _ = self.internal_tx.send(InternalEvent::Shutdown);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::ArmWaitingTimer => self.arm_waiting_timer(),
            Effect::DisarmWaitingTimer => {
                self.timer_generation += 1;
            }
            Effect::ResetKeyExchange => self.exchange.reset(),
            Effect::StartKeyExchange => match self.exchange.start() {
                Ok(handshake) => self.send_plain(&handshake.into()),
                Err(e) => warn!("cannot start key exchange: {e}"),
            },
            Effect::FlushQueue => self.flush_queue(),
            Effect::PersistSession => self.persist_session(),
            Effect::SendReady => {
                if let Err(e) = self.send_encrypted(&ChannelMessage::Ready) {
                    warn!("failed to send ready: {e}");
                }
            }
            Effect::SendOriginatorInfo => self.send_originator_info(),
            Effect::SendPause => {
                if let Err(e) = self.send_encrypted(&ChannelMessage::Pause) {
                    warn!("failed to send pause: {e}");
                }
            }
            Effect::SendTerminate => {
                if self.exchange.is_exchanged() {
                    if let Err(e) = self.send_encrypted(&ChannelMessage::Terminate) {
                        warn!("failed to send terminate: {e}");
                    }
                }
            }
            Effect::RejoinChannel => {
                if let Some(channel_id) = self.channel_id {
                    if let Err(e) = self.relay.join_channel(channel_id) {
                        warn!("rejoin failed: {e}");
                    }
                }
            }
            Effect::LeaveChannel => {
                if let Some(channel_id) = self.channel_id {
                    let _ = self.relay.leave_channel(channel_id);
                }
            }
            Effect::ClearSession => {
                if let Err(e) = self.store.clear() {
                    warn!("failed to clear session: {e}");
                }
            }
        }
    }

    fn arm_waiting_timer(&mut self) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let timeout = self.waiting_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(InternalEvent::TimerFired { generation });
        });
    }

    fn on_timer(&mut self, generation: u64) {
        if generation != self.timer_generation {
            trace!("stale waiting timer ignored");
            return;
        }
        warn!("no peer joined within {:?}", self.waiting_timeout);
        self.apply(ChannelEvent::WaitingTimerFired);
    }

    fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::ChannelCreated { channel_id } => {
                debug!("relay acknowledged channel {channel_id}");
            }
            RelayEvent::ClientsWaiting { count, .. } => {
                debug!("waiting in room, occupancy {count}");
                self.notify(NotificationKind::ClientsWaiting { count });
            }
            RelayEvent::ClientsConnected { channel_id } => {
                if !self.is_our_channel(&channel_id) {
                    return;
                }
                self.apply(ChannelEvent::PeerConnected);
            }
            RelayEvent::ClientsDisconnected { channel_id } => {
                if !self.is_our_channel(&channel_id) {
                    return;
                }
                self.apply(ChannelEvent::PeerDisconnected);
            }
            RelayEvent::Message { channel_id, payload } => {
                if !self.is_our_channel(&channel_id) {
                    return;
                }
                self.handle_incoming(&payload);
            }
            RelayEvent::RoomFull { channel_id } => {
                warn!("room {channel_id} already has two members");
                self.notify(NotificationKind::Error {
                    error: "room already full".to_string(),
                });
            }
            RelayEvent::RoomOccupancy { occupancy, .. } => {
                debug!("room occupancy probe answered: {occupancy}");
            }
            RelayEvent::Pong { .. } => trace!("relay pong"),
            RelayEvent::ServerError { error, .. } => {
                warn!("relay error: {error}");
                self.notify(NotificationKind::Error { error });
            }
            RelayEvent::Disconnected => {
                warn!("relay connection lost");
                self.apply(ChannelEvent::PeerDisconnected);
            }
        }
    }

    fn is_our_channel(&self, channel_id: &str) -> bool {
        match self.channel_id {
            Some(ours) if ours.to_string() == channel_id => true,
            _ => {
                warn!("event for foreign channel {channel_id} ignored");
                false
            }
        }
    }

    /// Handshake messages arrive as cleartext JSON; everything else is a
    /// base64 ciphertext that only parses after decryption.
    fn handle_incoming(&mut self, payload: &str) {
        if let Ok(message) = ChannelMessage::from_wire(payload) {
            match message.as_handshake() {
                Some(handshake) => self.on_handshake(handshake),
                None => warn!("unexpected cleartext message dropped"),
            }
            return;
        }

        let plaintext = match self.open_incoming(payload) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("undecryptable payload dropped: {e}");
                return;
            }
        };
        match ChannelMessage::from_wire(&plaintext) {
            Ok(message) => self.dispatch_secure(message),
            Err(e) => warn!("malformed decrypted payload dropped: {e}"),
        }
    }

    fn open_incoming(&self, payload: &str) -> Result<String> {
        let sealed = general_purpose::STANDARD.decode(payload)?;
        let plaintext = self.exchange.decrypt(&sealed)?;
        String::from_utf8(plaintext)
            .map_err(|e| crate::utils::PairlinkError::Serialization(e.to_string()))
    }

    fn on_handshake(&mut self, handshake: crate::keyexchange::HandshakeMessage) {
        let outcome = match self.exchange.handle_message(handshake) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("handshake message rejected: {e}");
                return;
            }
        };
        if let Some(reply) = outcome.reply {
            self.send_plain(&reply.into());
        }
        if outcome.completed {
            info!("key exchange completed");
            // Transition first so the notification reports the linked state
            self.apply(ChannelEvent::KeysExchanged);
            self.notify(NotificationKind::KeysExchanged);
        }
    }

    fn dispatch_secure(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Application { .. } => match message.application_payload() {
                Ok(Some(payload)) => self.notify(NotificationKind::Message { payload }),
                Ok(None) => {}
                Err(e) => warn!("invalid application payload: {e}"),
            },
            ChannelMessage::Ready => {
                debug!("peer signalled ready");
                if self.machine.is_originator() && !self.machine.originator_info_sent() {
                    self.send_originator_info();
                }
            }
            ChannelMessage::OriginatorInfo { originator_info } => {
                let reply = ChannelMessage::WalletInfo {
                    wallet_info: self.metadata.wallet_info.clone(),
                };
                if let Err(e) = self.send_encrypted(&reply) {
                    warn!("failed to send wallet info: {e}");
                }
                self.notify(NotificationKind::ClientsReady {
                    peer: PeerInfo::Originator(originator_info),
                });
            }
            ChannelMessage::WalletInfo { wallet_info } => {
                self.notify(NotificationKind::ClientsReady {
                    peer: PeerInfo::Wallet(wallet_info),
                });
            }
            ChannelMessage::Pause => self.apply(ChannelEvent::PauseRequested { local: false }),
            ChannelMessage::Terminate => {
                info!("peer terminated the pairing");
                self.apply(ChannelEvent::TerminateRequested { local: false });
            }
            ChannelMessage::KeyHandshakeSyn { .. }
            | ChannelMessage::KeyHandshakeSynAck { .. }
            | ChannelMessage::KeyHandshakeAck => {
                warn!("handshake message inside encrypted envelope dropped");
            }
        }
    }

    fn send_originator_info(&mut self) {
        let message = ChannelMessage::OriginatorInfo {
            originator_info: self.metadata.originator_info.clone(),
        };
        match self.send_encrypted(&message) {
            Ok(()) => self.machine.mark_originator_info_sent(),
            Err(e) => warn!("failed to send originator info: {e}"),
        }
    }

    fn flush_queue(&mut self) {
        let pending: Vec<_> = self.queue.drain(..).collect();
        if !pending.is_empty() {
            debug!("flushing {} queued messages", pending.len());
        }
        for payload in pending {
            if let Err(e) = self.send_encrypted(&ChannelMessage::application(&payload)) {
                warn!("failed to flush queued message: {e}");
            }
        }
    }

    fn persist_session(&mut self) {
        let Some(channel_id) = self.channel_id else {
            return;
        };
        let config = ChannelConfig {
            channel_id,
            valid_until: chrono::Utc::now().timestamp_millis() + self.session_duration_ms as i64,
            local_key: Some(self.exchange.public_key_hex()),
            other_key: self.exchange.other_public_key_hex(),
        };
        // Persistence failures must not take the live channel down
        if let Err(e) = self.store.persist(&config) {
            warn!("failed to persist session: {e}");
        }
    }

    fn send_plain(&self, message: &ChannelMessage) {
        let Some(channel_id) = self.channel_id else {
            return;
        };
        match message.to_wire() {
            Ok(wire) => {
                if let Err(e) = self.relay.send_message(channel_id, wire) {
                    warn!("relay send failed: {e}");
                }
            }
            Err(e) => warn!("cannot serialize message: {e}"),
        }
    }

    fn send_encrypted(&self, message: &ChannelMessage) -> Result<()> {
        let channel_id = self
            .channel_id
            .ok_or(crate::utils::PairlinkError::Channel(ChannelError::NotConnected))?;
        let wire = message.to_wire()?;
        let sealed = self.exchange.encrypt(wire.as_bytes())?;
        self.relay
            .send_message(channel_id, general_purpose::STANDARD.encode(sealed))
    }

    fn notify(&self, kind: NotificationKind) {
        let _ = self.notify_tx.send(ChannelNotification {
            kind,
            state: self.machine.state(),
        });
    }
}
