//! Client side of the relay transport.
//!
//! A [`RelayClient`] is an injected, per-channel transport instance; the
//! relay URL comes from configuration, never from a module-level singleton.
//! All request methods are synchronous enqueues onto a writer task, so the
//! secure channel can issue them while holding its state lock without ever
//! awaiting. Inbound traffic surfaces as a stream of [`RelayEvent`]s; a
//! dropped socket surfaces as [`RelayEvent::Disconnected`], never as an
//! error return, because disconnection is an expected, frequent event.

use crate::relay::protocol::{ClientRequest, ServerEvent, ERR_ROOM_FULL};
use crate::utils::{RelayError, Result};
use log::{debug, trace, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transport-level event delivered to the owning secure channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The room was created with us as sole member
    ChannelCreated {
        /// Channel identifier
        channel_id: String,
    },
    /// We joined and the room still waits for the peer
    ClientsWaiting {
        /// Channel identifier
        channel_id: String,
        /// Current occupancy
        count: usize,
    },
    /// Both peers are in the room
    ClientsConnected {
        /// Channel identifier
        channel_id: String,
    },
    /// The peer left or dropped
    ClientsDisconnected {
        /// Channel identifier
        channel_id: String,
    },
    /// Opaque payload from the peer
    Message {
        /// Channel identifier
        channel_id: String,
        /// Payload, exactly as sent
        payload: String,
    },
    /// Join was rejected because the room already had two members
    RoomFull {
        /// Channel identifier
        channel_id: String,
    },
    /// Occupancy answer to a check-room probe
    RoomOccupancy {
        /// Channel identifier
        channel_id: String,
        /// Current occupancy
        occupancy: usize,
    },
    /// Answer to a connectivity probe
    Pong {
        /// Channel identifier
        channel_id: String,
    },
    /// Any other error payload from the server
    ServerError {
        /// Channel the error refers to, when known
        channel_id: Option<String>,
        /// Error description
        error: String,
    },
    /// The relay socket dropped
    Disconnected,
}

/// Handle to one relay connection
#[derive(Debug, Clone)]
pub struct RelayClient {
    requests: mpsc::UnboundedSender<ClientRequest>,
}

impl RelayClient {
    /// Connect to the relay server and spawn the reader/writer tasks.
    ///
    /// Returns the client handle and the event stream. Dropping the client
    /// (and all its clones) closes the connection.
    pub async fn connect(server_url: &str) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>)> {
        let socket = TcpStream::connect(server_url).await?;
        socket.set_nodelay(true)?;
        debug!("connected to relay at {server_url}");

        let (read_half, mut write_half) = socket.into_split();
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<ClientRequest>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayEvent>();

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let Ok(line) = request.to_line() else { continue };
                trace!("relay >> {line}");
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                trace!("relay << {line}");
                match ServerEvent::from_line(&line) {
                    Ok(event) => {
                        if event_tx.send(map_event(event)).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!("dropping unparseable relay event: {err}"),
                }
            }
            // EOF or read error: the transport is gone.
            let _ = event_tx.send(RelayEvent::Disconnected);
        });

        Ok((
            Self {
                requests: request_tx,
            },
            event_rx,
        ))
    }

    /// Register a new room under `channel_id`
    pub fn create_channel(&self, channel_id: Uuid) -> Result<()> {
        self.enqueue(ClientRequest::CreateChannel {
            channel_id: channel_id.to_string(),
        })
    }

    /// Join the room under `channel_id`
    pub fn join_channel(&self, channel_id: Uuid) -> Result<()> {
        self.enqueue(ClientRequest::JoinChannel {
            channel_id: channel_id.to_string(),
        })
    }

    /// Relay an opaque payload to the peer
    pub fn send_message(&self, channel_id: Uuid, payload: String) -> Result<()> {
        self.enqueue(ClientRequest::Message {
            channel_id: channel_id.to_string(),
            payload,
        })
    }

    /// Leave the room, notifying the peer
    pub fn leave_channel(&self, channel_id: Uuid) -> Result<()> {
        self.enqueue(ClientRequest::LeaveChannel {
            channel_id: channel_id.to_string(),
        })
    }

    /// Connectivity probe; the server answers with a pong
    pub fn ping(&self, channel_id: Uuid) -> Result<()> {
        self.enqueue(ClientRequest::Ping {
            channel_id: channel_id.to_string(),
        })
    }

    /// Probe room occupancy
    pub fn check_room(&self, channel_id: Uuid) -> Result<()> {
        self.enqueue(ClientRequest::CheckRoom {
            channel_id: channel_id.to_string(),
        })
    }

    fn enqueue(&self, request: ClientRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| RelayError::Disconnected.into())
    }
}

fn map_event(event: ServerEvent) -> RelayEvent {
    match event {
        ServerEvent::ChannelCreated { channel_id } => RelayEvent::ChannelCreated { channel_id },
        ServerEvent::ClientsWaiting { channel_id, count } => {
            RelayEvent::ClientsWaiting { channel_id, count }
        }
        ServerEvent::ClientsConnected { channel_id } => {
            RelayEvent::ClientsConnected { channel_id }
        }
        ServerEvent::ClientsDisconnected { channel_id } => {
            RelayEvent::ClientsDisconnected { channel_id }
        }
        ServerEvent::Message {
            channel_id,
            payload,
        } => RelayEvent::Message {
            channel_id,
            payload,
        },
        ServerEvent::RoomOccupancy {
            channel_id,
            occupancy,
        } => RelayEvent::RoomOccupancy {
            channel_id,
            occupancy,
        },
        ServerEvent::Pong { channel_id } => RelayEvent::Pong { channel_id },
        ServerEvent::Error {
            channel_id: Some(channel_id),
            error,
        } if error == ERR_ROOM_FULL => RelayEvent::RoomFull { channel_id },
        ServerEvent::Error { channel_id, error } => {
            RelayEvent::ServerError { channel_id, error }
        }
    }
}
