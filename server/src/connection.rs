//! Non-owning handles to live client connections
//!
//! The per-connection read loop owns the socket. Everything else (sessions,
//! matchmaking entries, room occupants) holds a cloneable [`ConnectionHandle`]
//! that feeds the connection's outbound queue; a writer task drains that
//! queue onto the socket, so enqueueing never blocks on network I/O.
//!
//! The queue is bounded. A peer that stops reading loses frames once its
//! queue is full instead of growing server memory.

use crate::messenger::SendError;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type ConnectionId = u64;

/// Frames a connection may have waiting before further sends are dropped
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1000;

/// Encoded frames waiting to be written to one connection
pub type OutboundQueue = mpsc::Receiver<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id, peer, outbound }
    }

    /// Creates a handle together with the queue its frames land in
    pub fn channel(id: ConnectionId, peer: SocketAddr) -> (Self, OutboundQueue) {
        Self::with_capacity(id, peer, OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        id: ConnectionId,
        peer: SocketAddr,
        capacity: usize,
    ) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(id, peer, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }

    /// True once the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    pub(crate) fn enqueue(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull {
                connection: self.id,
            },
            TrySendError::Closed(_) => SendError::Disconnected {
                connection: self.id,
            },
        })
    }
}
