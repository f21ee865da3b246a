//! The relay server: a dumb pub/sub room router.
//!
//! Rooms are keyed by channel id and hold at most two members. The server
//! never inspects payloads and holds no cryptographic material; its entire
//! job is to route opaque bytes between a pair of peers and to report
//! membership changes. All room mutation goes through one mutex, so two
//! concurrent joins can never both observe a one-member room and produce a
//! three-member one.

use crate::relay::protocol::{
    validate_channel_id, ClientRequest, ServerEvent, ERR_INVALID_ID, ERR_ROOM_EXISTS,
    ERR_ROOM_FULL,
};
use crate::relay::rate_limit::RateLimiter;
use crate::utils::{RelayConfig, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One connected client's handle inside a room
#[derive(Debug, Clone)]
struct Member {
    conn_id: u64,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Outcome of a join attempt, computed under the room-table lock
#[derive(Debug)]
enum JoinOutcome {
    /// Joined; the room still waits for its second member
    Waiting { count: usize },
    /// Joined; the room is now complete
    Connected { members: Vec<Member> },
    /// Rejected; the room already had two members and has been evicted
    Full { evicted: Vec<Member> },
}

/// In-memory membership index. Absent key == empty room.
#[derive(Debug, Default)]
struct RoomTable {
    rooms: HashMap<Uuid, Vec<Member>>,
}

impl RoomTable {
    /// Register a new room with the creator as sole member
    fn create(&mut self, channel_id: Uuid, creator: Member) -> std::result::Result<(), &'static str> {
        let members = self.rooms.entry(channel_id).or_default();
        if !members.is_empty() {
            return Err(ERR_ROOM_EXISTS);
        }
        members.push(creator);
        Ok(())
    }

    /// Join a room, enforcing the two-member capacity invariant.
    ///
    /// A connection already in the room (resuming after a pause that never
    /// left) re-joins in place instead of counting as a third member.
    fn join(&mut self, channel_id: Uuid, joiner: Member) -> JoinOutcome {
        let members = self.rooms.entry(channel_id).or_default();

        if let Some(existing) = members.iter_mut().find(|m| m.conn_id == joiner.conn_id) {
            existing.tx = joiner.tx;
            return if members.len() == 2 {
                JoinOutcome::Connected {
                    members: members.clone(),
                }
            } else {
                JoinOutcome::Waiting {
                    count: members.len(),
                }
            };
        }

        if members.len() >= 2 {
            let evicted = std::mem::take(members);
            self.rooms.remove(&channel_id);
            return JoinOutcome::Full { evicted };
        }

        members.push(joiner);
        if members.len() == 2 {
            JoinOutcome::Connected {
                members: members.clone(),
            }
        } else {
            JoinOutcome::Waiting {
                count: members.len(),
            }
        }
    }

    /// Other members of a room, for payload relay
    fn peers_of(&self, channel_id: Uuid, conn_id: u64) -> Vec<Member> {
        self.rooms
            .get(&channel_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.conn_id != conn_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one member from one room; returns the remaining members
    fn leave(&mut self, channel_id: Uuid, conn_id: u64) -> Vec<Member> {
        let Some(members) = self.rooms.get_mut(&channel_id) else {
            return Vec::new();
        };
        members.retain(|m| m.conn_id != conn_id);
        let remaining = members.clone();
        if members.is_empty() {
            self.rooms.remove(&channel_id);
        }
        remaining
    }

    /// Remove a dropped connection from every room it joined;
    /// returns `(channel, remaining members)` per affected room
    fn drop_connection(&mut self, conn_id: u64) -> Vec<(Uuid, Vec<Member>)> {
        let affected: Vec<Uuid> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.conn_id == conn_id))
            .map(|(id, _)| *id)
            .collect();

        affected
            .into_iter()
            .map(|id| (id, self.leave(id, conn_id)))
            .collect()
    }

    fn occupancy(&self, channel_id: Uuid) -> usize {
        self.rooms.get(&channel_id).map_or(0, Vec::len)
    }

    /// Drop rooms whose members have all gone away without a clean leave
    fn prune_dead(&mut self) {
        self.rooms.retain(|_, members| {
            members.retain(|m| !m.tx.is_closed());
            !members.is_empty()
        });
    }
}

/// Shared mutable server state
struct ServerState {
    rooms: Mutex<RoomTable>,
    control_limiter: Mutex<RateLimiter>,
    message_limiter: Mutex<RateLimiter>,
    next_conn_id: AtomicU64,
    idle_expiry_secs: u64,
}

/// The relay server. Bind, then [`RelayServer::run`] the accept loop.
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl RelayServer {
    /// Bind the relay server to the configured listen address
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!("relay listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                rooms: Mutex::new(RoomTable::default()),
                control_limiter: Mutex::new(RateLimiter::new(config.control_rate_limit)),
                message_limiter: Mutex::new(RateLimiter::new(config.message_rate_limit)),
                next_conn_id: AtomicU64::new(1),
                idle_expiry_secs: config.room_idle_expiry,
            }),
        })
    }

    /// The address the server actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until the task is aborted
    pub async fn run(self) -> Result<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(prune_loop(Arc::clone(&state)));

        loop {
            let (socket, peer) = self.listener.accept().await?;
            let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
            debug!("connection {conn_id} accepted from {peer}");
            tokio::spawn(handle_connection(
                Arc::clone(&state),
                socket,
                peer,
                conn_id,
            ));
        }
    }
}

/// Periodically drop dead rooms and idle limiter buckets
async fn prune_loop(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        interval.tick().await;
        state.rooms.lock().expect("room table lock").prune_dead();
        state
            .control_limiter
            .lock()
            .expect("limiter lock")
            .prune(state.idle_expiry_secs);
        state
            .message_limiter
            .lock()
            .expect("limiter lock")
            .prune(state.idle_expiry_secs);
    }
}

/// One task per client connection: read requests, route, push events
async fn handle_connection(
    state: Arc<ServerState>,
    socket: TcpStream,
    peer: SocketAddr,
    conn_id: u64,
) {
    let (read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: drain outbound events to the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(line) = event.to_line() else { continue };
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match ClientRequest::from_line(&line) {
            Ok(request) => handle_request(&state, &tx, peer, conn_id, request),
            Err(err) => {
                debug!("connection {conn_id}: unparseable request: {err}");
                let _ = tx.send(ServerEvent::Error {
                    channel_id: None,
                    error: "malformed request".to_string(),
                });
            }
        }
    }

    // Socket gone: notify every room this connection was part of.
    let notifications = state
        .rooms
        .lock()
        .expect("room table lock")
        .drop_connection(conn_id);
    for (channel_id, remaining) in notifications {
        debug!("connection {conn_id} dropped from channel {channel_id}");
        broadcast(
            &remaining,
            ServerEvent::ClientsDisconnected {
                channel_id: channel_id.to_string(),
            },
        );
    }

    drop(tx);
    let _ = writer.await;
    debug!("connection {conn_id} closed");
}

fn handle_request(
    state: &ServerState,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    peer: SocketAddr,
    conn_id: u64,
    request: ClientRequest,
) {
    // Control operations and message relay deplete separate buckets; a
    // depleted bucket drops the request without a reply.
    let limiter = match request {
        ClientRequest::Message { .. } | ClientRequest::Ping { .. } => &state.message_limiter,
        _ => &state.control_limiter,
    };
    if !limiter
        .lock()
        .expect("limiter lock")
        .try_consume(peer.ip())
    {
        warn!("rate limit exceeded by {peer}, dropping {request:?}");
        return;
    }

    let raw_id = request.channel_id().to_string();
    let channel_id = match validate_channel_id(&raw_id) {
        Ok(id) => id,
        Err(_) => {
            let _ = tx.send(ServerEvent::Error {
                channel_id: Some(raw_id),
                error: ERR_INVALID_ID.to_string(),
            });
            return;
        }
    };

    let member = Member {
        conn_id,
        tx: tx.clone(),
    };

    match request {
        ClientRequest::CreateChannel { .. } => {
            let result = state
                .rooms
                .lock()
                .expect("room table lock")
                .create(channel_id, member);
            match result {
                Ok(()) => {
                    info!("channel {channel_id} created by connection {conn_id}");
                    let _ = tx.send(ServerEvent::ChannelCreated {
                        channel_id: raw_id,
                    });
                }
                Err(reason) => {
                    let _ = tx.send(ServerEvent::Error {
                        channel_id: Some(raw_id),
                        error: reason.to_string(),
                    });
                }
            }
        }
        ClientRequest::JoinChannel { .. } => {
            let outcome = state
                .rooms
                .lock()
                .expect("room table lock")
                .join(channel_id, member);
            match outcome {
                JoinOutcome::Waiting { count } => {
                    debug!("channel {channel_id}: waiting with {count} member(s)");
                    let _ = tx.send(ServerEvent::ClientsWaiting {
                        channel_id: raw_id,
                        count,
                    });
                }
                JoinOutcome::Connected { members } => {
                    info!("channel {channel_id}: both clients connected");
                    broadcast(
                        &members,
                        ServerEvent::ClientsConnected {
                            channel_id: raw_id,
                        },
                    );
                }
                JoinOutcome::Full { evicted } => {
                    warn!("channel {channel_id}: third join attempt, evicting room");
                    let _ = tx.send(ServerEvent::Error {
                        channel_id: Some(raw_id.clone()),
                        error: ERR_ROOM_FULL.to_string(),
                    });
                    broadcast(
                        &evicted,
                        ServerEvent::ClientsDisconnected {
                            channel_id: raw_id,
                        },
                    );
                }
            }
        }
        ClientRequest::Message { payload, .. } => {
            let peers = state
                .rooms
                .lock()
                .expect("room table lock")
                .peers_of(channel_id, conn_id);
            broadcast(
                &peers,
                ServerEvent::Message {
                    channel_id: raw_id,
                    payload,
                },
            );
        }
        ClientRequest::LeaveChannel { .. } => {
            let remaining = state
                .rooms
                .lock()
                .expect("room table lock")
                .leave(channel_id, conn_id);
            debug!("connection {conn_id} left channel {channel_id}");
            broadcast(
                &remaining,
                ServerEvent::ClientsDisconnected {
                    channel_id: raw_id,
                },
            );
        }
        ClientRequest::CheckRoom { .. } => {
            let occupancy = state
                .rooms
                .lock()
                .expect("room table lock")
                .occupancy(channel_id);
            let _ = tx.send(ServerEvent::RoomOccupancy {
                channel_id: raw_id,
                occupancy,
            });
        }
        ClientRequest::Ping { .. } => {
            let _ = tx.send(ServerEvent::Pong { channel_id: raw_id });
        }
    }
}

fn broadcast(members: &[Member], event: ServerEvent) {
    for member in members {
        // A closed receiver means the member is mid-disconnect; the
        // drop_connection path will clean it up.
        let _ = member.tx.send(event.clone());
    }
}
