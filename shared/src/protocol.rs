//! Envelope protocol carried inside each frame
//!
//! Every message on the wire is one [`Envelope`]: a [`MessageKind`] tag plus
//! exactly one [`Payload`] variant. Requests from clients use the
//! `PlayerRequest`, `RoomPlayerUpdate` and `PositionReport` variants; every
//! server-originated message is a `Response`, optionally carrying a room
//! snapshot or a single-player update.

use crate::PlayerState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Decode(bincode::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(bincode::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SessionLogin,
    SessionLogout,
    MatchmakingStart,
    MatchmakingCancel,
    PlayerPositionUpdate,
    PlayerHpUpdate,
    PlayerChangeWeapon,
    PlayerAnimation,
}

/// Status carried by every server response. Discriminants are part of the
/// wire contract.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Success = 0,
    Error = 1,
    BadRequest = 2,
    NotFound = 3,
    Conflict = 4,
}

impl ResponseCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(value: i32) -> Option<Self> {
        match value {
            0 => Some(ResponseCode::Success),
            1 => Some(ResponseCode::Error),
            2 => Some(ResponseCode::BadRequest),
            3 => Some(ResponseCode::NotFound),
            4 => Some(ResponseCode::Conflict),
            _ => None,
        }
    }
}

/// Identity-only request used by session and matchmaking messages
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerRequest {
    pub player_id: String,
}

/// A player's state inside a room, sent by clients to mutate it and by the
/// server to mirror it to the other occupant
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomPlayerUpdate {
    pub room_id: String,
    pub player: PlayerState,
}

/// Lightweight telemetry report; never mutates room state
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PositionReport {
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Full snapshot of a room, pushed to each occupant when the room is created
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomInfo {
    pub room_id: String,
    pub players: Vec<PlayerState>,
}

impl RoomInfo {
    pub fn player(&self, player_id: &str) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.player_id == player_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ResponseData {
    RoomInfo(RoomInfo),
    RoomPlayerUpdate(RoomPlayerUpdate),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Response {
    pub code: ResponseCode,
    pub message: String,
    pub data: Option<ResponseData>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Payload {
    PlayerRequest(PlayerRequest),
    RoomPlayerUpdate(RoomPlayerUpdate),
    PositionReport(PositionReport),
    Response(Response),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(kind: MessageKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    pub fn player_request(kind: MessageKind, player_id: impl Into<String>) -> Self {
        Self::new(
            kind,
            Payload::PlayerRequest(PlayerRequest {
                player_id: player_id.into(),
            }),
        )
    }

    pub fn room_update(kind: MessageKind, room_id: impl Into<String>, player: PlayerState) -> Self {
        Self::new(
            kind,
            Payload::RoomPlayerUpdate(RoomPlayerUpdate {
                room_id: room_id.into(),
                player,
            }),
        )
    }

    pub fn response(kind: MessageKind, code: ResponseCode, message: impl Into<String>) -> Self {
        Self::new(
            kind,
            Payload::Response(Response {
                code,
                message: message.into(),
                data: None,
            }),
        )
    }

    /// Attaches a data section to a response envelope. Non-response
    /// envelopes are returned unchanged.
    pub fn with_data(mut self, data: ResponseData) -> Self {
        if let Payload::Response(response) = &mut self.payload {
            response.data = Some(data);
        }
        self
    }

    pub fn as_response(&self) -> Option<&Response> {
        match &self.payload {
            Payload::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(ProtocolError::Decode)
    }
}
