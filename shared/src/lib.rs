//! Types shared by the session server and its clients: player state, the
//! envelope protocol and the length-prefixed framing codec.

use serde::{Deserialize, Serialize};

pub mod framing;
pub mod protocol;

pub use framing::{encode_frame, read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_SIZE};
pub use protocol::{
    Envelope, MessageKind, Payload, PlayerRequest, PositionReport, ProtocolError, Response,
    ResponseCode, ResponseData, RoomInfo, RoomPlayerUpdate,
};

pub const DEFAULT_HEALTH: f32 = 100.0;
pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Animation blend parameters mirrored to the other occupant of a room
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct AnimationParams {
    pub is_running: bool,
    pub is_aiming: bool,
    pub move_x: f32,
    pub move_y: f32,
    pub weapon_type: i32,
}

/// Transient per-room state of one player.
///
/// Only meaningful while the player occupies a room; a fresh room seats
/// every occupant at [`PlayerState::new`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub player_id: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub speed: f32,
    pub health: f32,
    pub weapon_type: i32,
    pub animation: AnimationParams,
}

impl PlayerState {
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            position: Vec3::default(),
            rotation: Vec3::default(),
            speed: 0.0,
            health: DEFAULT_HEALTH,
            weapon_type: 0,
            animation: AnimationParams::default(),
        }
    }

    /// Copies the movement fields (position, rotation, speed) from `update`
    pub fn apply_movement(&mut self, update: &PlayerState) {
        self.position = update.position;
        self.rotation = update.rotation;
        self.speed = update.speed;
    }

    pub fn apply_health(&mut self, update: &PlayerState) {
        self.health = update.health;
    }

    /// Switches weapon; the animation bundle follows so remote rigs pick the
    /// matching pose
    pub fn apply_weapon(&mut self, update: &PlayerState) {
        self.weapon_type = update.weapon_type;
        self.animation.weapon_type = update.weapon_type;
    }

    pub fn apply_animation(&mut self, update: &PlayerState) {
        self.animation = update.animation;
    }
}
