//! Outbound messenger: serializes envelopes, applies framing and hands the
//! frames to one or many connections.
//!
//! Delivery is best-effort. A failure for one recipient is logged and never
//! aborts delivery to the others; there is no acknowledgement or retry.

use crate::connection::{ConnectionHandle, ConnectionId};
use log::{debug, warn};
use shared::{encode_frame, Envelope, FrameError, MessageKind, ProtocolError, ResponseCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] ProtocolError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("connection {connection} is no longer accepting frames")]
    Disconnected { connection: ConnectionId },
    #[error("outbound queue of connection {connection} is full, frame dropped")]
    QueueFull { connection: ConnectionId },
}

/// One message bound for one connection, collected while a registry lock is
/// held and flushed before it is released
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub to: ConnectionHandle,
    pub envelope: Envelope,
}

impl Outgoing {
    pub fn new(to: &ConnectionHandle, envelope: Envelope) -> Self {
        Self {
            to: to.clone(),
            envelope,
        }
    }
}

pub type Outbox = Vec<Outgoing>;

#[derive(Debug, Clone, Default)]
pub struct Messenger;

impl Messenger {
    pub fn new() -> Self {
        Self
    }

    pub fn frame(envelope: &Envelope) -> Result<Vec<u8>, SendError> {
        let payload = envelope.encode()?;
        Ok(encode_frame(&payload)?)
    }

    pub fn send(&self, to: &ConnectionHandle, envelope: &Envelope) -> Result<(), SendError> {
        let frame = Self::frame(envelope)?;
        to.enqueue(frame)?;
        debug!("Queued {:?} for connection {}", envelope.kind, to.id());
        Ok(())
    }

    /// Sends a plain status response, logging instead of failing
    pub fn respond(
        &self,
        to: &ConnectionHandle,
        kind: MessageKind,
        code: ResponseCode,
        message: impl Into<String>,
    ) {
        let envelope = Envelope::response(kind, code, message);
        if let Err(e) = self.send(to, &envelope) {
            warn!("Failed to send {:?} response to {}: {}", kind, to.peer(), e);
        }
    }

    /// Encodes once and queues the frame for every recipient
    pub fn multicast<'a, I>(&self, recipients: I, envelope: &Envelope)
    where
        I: IntoIterator<Item = &'a ConnectionHandle>,
    {
        let frame = match Self::frame(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {:?} broadcast: {}", envelope.kind, e);
                return;
            }
        };

        for recipient in recipients {
            if let Err(e) = recipient.enqueue(frame.clone()) {
                warn!("Failed to send to {} ({}): {}", recipient.id(), recipient.peer(), e);
            }
        }
    }

    pub fn deliver(&self, outbox: Outbox) {
        for Outgoing { to, envelope } in outbox {
            if let Err(e) = self.send(&to, &envelope) {
                warn!("Failed to send {:?} to {}: {}", envelope.kind, to.peer(), e);
            }
        }
    }
}
