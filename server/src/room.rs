//! Room registry: per-match player state and its replication
//!
//! A room is created the moment two players are paired. Its identifier is
//! derived from both player identifiers in pairing order. Occupants are never
//! removed individually; the whole room is torn down at once.
//!
//! Every mutation computes its outbound messages while the registry lock is
//! held and queues them before releasing it, so each recipient observes
//! updates in the order they were applied.

use crate::connection::ConnectionHandle;
use crate::messenger::{Messenger, Outbox, Outgoing};
use log::{debug, info};
use shared::{
    Envelope, MessageKind, PlayerState, ResponseCode, ResponseData, RoomInfo, RoomPlayerUpdate,
};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

pub const ROOM_ID_SEPARATOR: char = '|';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room {0} already exists")]
    RoomExists(String),
    #[error("player {player_id} is already in room {room_id}")]
    PlayerAlreadyInRoom { player_id: String, room_id: String },
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("player {player_id} not found in room {room_id}")]
    PlayerNotFound { room_id: String, player_id: String },
}

impl RoomError {
    pub fn status(&self) -> ResponseCode {
        match self {
            RoomError::RoomExists(_) | RoomError::PlayerAlreadyInRoom { .. } => {
                ResponseCode::Conflict
            }
            RoomError::RoomNotFound(_) | RoomError::PlayerNotFound { .. } => ResponseCode::NotFound,
        }
    }
}

/// Which slice of a player's state an update carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Position,
    Health,
    Weapon,
    Animation,
}

impl UpdateKind {
    /// Tag used both for the request and for the broadcast it triggers
    pub fn message_kind(self) -> MessageKind {
        match self {
            UpdateKind::Position => MessageKind::PlayerPositionUpdate,
            UpdateKind::Health => MessageKind::PlayerHpUpdate,
            UpdateKind::Weapon => MessageKind::PlayerChangeWeapon,
            UpdateKind::Animation => MessageKind::PlayerAnimation,
        }
    }

    fn apply(self, target: &mut PlayerState, update: &PlayerState) {
        match self {
            UpdateKind::Position => target.apply_movement(update),
            UpdateKind::Health => target.apply_health(update),
            UpdateKind::Weapon => target.apply_weapon(update),
            UpdateKind::Animation => target.apply_animation(update),
        }
    }
}

/// Player identifiers joined in pairing order
pub fn room_id_for(player1: &str, player2: &str) -> String {
    format!("{}{}{}", player1, ROOM_ID_SEPARATOR, player2)
}

#[derive(Debug, Clone)]
pub struct Occupant {
    pub state: PlayerState,
    pub connection: ConnectionHandle,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    occupants: Vec<Occupant>,
}

impl Room {
    fn new(room_id: String, occupants: Vec<Occupant>) -> Self {
        Self { room_id, occupants }
    }

    pub fn occupant(&self, player_id: &str) -> Option<&Occupant> {
        self.occupants.iter().find(|o| o.state.player_id == player_id)
    }

    fn occupant_mut(&mut self, player_id: &str) -> Option<&mut Occupant> {
        self.occupants
            .iter_mut()
            .find(|o| o.state.player_id == player_id)
    }

    pub fn occupants(&self) -> &[Occupant] {
        &self.occupants
    }

    pub fn snapshot(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            players: self.occupants.iter().map(|o| o.state.clone()).collect(),
        }
    }

    /// Connections of everyone in the room except `player_id`
    fn others(&self, player_id: &str) -> impl Iterator<Item = &ConnectionHandle> {
        let player_id = player_id.to_string();
        self.occupants
            .iter()
            .filter(move |o| o.state.player_id != player_id)
            .map(|o| &o.connection)
    }
}

#[derive(Default)]
struct Rooms {
    rooms: HashMap<String, Room>,
    /// player id -> room id; a player sits in at most one room
    seats: HashMap<String, String>,
}

pub struct RoomRegistry {
    inner: Mutex<Rooms>,
    messenger: Messenger,
}

impl RoomRegistry {
    pub fn new(messenger: Messenger) -> Self {
        Self {
            inner: Mutex::new(Rooms::default()),
            messenger,
        }
    }

    /// Seats both players in a new room and pushes the full snapshot to each
    /// of them individually.
    ///
    /// Fails without side effects if the derived room id is taken or either
    /// player already occupies a room.
    pub async fn create_room(
        &self,
        player1: (&str, &ConnectionHandle),
        player2: (&str, &ConnectionHandle),
    ) -> Result<RoomInfo, RoomError> {
        let mut inner = self.inner.lock().await;
        let room_id = room_id_for(player1.0, player2.0);

        if inner.rooms.contains_key(&room_id) {
            return Err(RoomError::RoomExists(room_id));
        }
        for player_id in [player1.0, player2.0] {
            if let Some(existing) = inner.seats.get(player_id) {
                return Err(RoomError::PlayerAlreadyInRoom {
                    player_id: player_id.to_string(),
                    room_id: existing.clone(),
                });
            }
        }

        let occupants = [player1, player2]
            .into_iter()
            .map(|(player_id, connection)| Occupant {
                state: PlayerState::new(player_id),
                connection: connection.clone(),
            })
            .collect();
        let room = Room::new(room_id.clone(), occupants);
        let snapshot = room.snapshot();

        let outbox: Outbox = room
            .occupants()
            .iter()
            .map(|occupant| {
                let envelope = Envelope::response(
                    MessageKind::MatchmakingStart,
                    ResponseCode::Success,
                    format!("room {} created, match starting", room_id),
                )
                .with_data(ResponseData::RoomInfo(snapshot.clone()));
                Outgoing::new(&occupant.connection, envelope)
            })
            .collect();

        inner.seats.insert(player1.0.to_string(), room_id.clone());
        inner.seats.insert(player2.0.to_string(), room_id.clone());
        inner.rooms.insert(room_id.clone(), room);
        info!("Room {} created for {} and {}", room_id, player1.0, player2.0);

        self.messenger.deliver(outbox);
        Ok(snapshot)
    }

    /// Applies one slice of `update` to the sender's state and mirrors the
    /// result to every other occupant. The sender never receives its own
    /// update; failures are answered to `requester` only.
    pub async fn update_player(
        &self,
        kind: UpdateKind,
        update: &RoomPlayerUpdate,
        requester: &ConnectionHandle,
    ) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;

        let result = Self::apply_update(&mut inner, kind, update);
        match result {
            Ok(outbox) => {
                self.messenger.deliver(outbox);
                Ok(())
            }
            Err(err) => {
                self.messenger
                    .respond(requester, kind.message_kind(), err.status(), err.to_string());
                Err(err)
            }
        }
    }

    fn apply_update(
        inner: &mut Rooms,
        kind: UpdateKind,
        update: &RoomPlayerUpdate,
    ) -> Result<Outbox, RoomError> {
        let player_id = update.player.player_id.as_str();
        let room = inner
            .rooms
            .get_mut(&update.room_id)
            .ok_or_else(|| RoomError::RoomNotFound(update.room_id.clone()))?;
        let occupant = room
            .occupant_mut(player_id)
            .ok_or_else(|| RoomError::PlayerNotFound {
                room_id: update.room_id.clone(),
                player_id: player_id.to_string(),
            })?;

        kind.apply(&mut occupant.state, &update.player);
        let mirrored = RoomPlayerUpdate {
            room_id: update.room_id.clone(),
            player: occupant.state.clone(),
        };
        debug!("{:?} update from {} in room {}", kind, player_id, update.room_id);

        let envelope = Envelope::response(
            kind.message_kind(),
            ResponseCode::Success,
            format!("player {} updated", player_id),
        )
        .with_data(ResponseData::RoomPlayerUpdate(mirrored));

        Ok(room
            .others(player_id)
            .map(|to| Outgoing::new(to, envelope.clone()))
            .collect())
    }

    /// Tears down a room without notifying its occupants
    pub async fn delete_room(&self, room_id: &str) -> Result<RoomInfo, RoomError> {
        let mut inner = self.inner.lock().await;
        Self::remove_room(&mut inner, room_id)
    }

    /// Tears down whatever room `player_id` sits in, if any
    pub async fn delete_room_of(&self, player_id: &str) -> Option<RoomInfo> {
        let mut inner = self.inner.lock().await;
        let room_id = inner.seats.get(player_id)?.clone();
        Self::remove_room(&mut inner, &room_id).ok()
    }

    fn remove_room(inner: &mut Rooms, room_id: &str) -> Result<RoomInfo, RoomError> {
        let room = inner
            .rooms
            .remove(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        for occupant in room.occupants() {
            inner.seats.remove(&occupant.state.player_id);
        }
        info!("Room {} deleted", room_id);
        Ok(room.snapshot())
    }

    /// Points a seated player's outbound traffic at a new connection.
    /// Returns false if the player is not in a room.
    pub async fn rebind_connection(&self, player_id: &str, connection: &ConnectionHandle) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(room_id) = inner.seats.get(player_id).cloned() else {
            return false;
        };
        match inner
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.occupant_mut(player_id))
        {
            Some(occupant) => {
                occupant.connection = connection.clone();
                true
            }
            None => false,
        }
    }

    pub async fn room_of(&self, player_id: &str) -> Option<String> {
        self.inner.lock().await.seats.get(player_id).cloned()
    }

    pub async fn snapshot(&self, room_id: &str) -> Option<RoomInfo> {
        self.inner.lock().await.rooms.get(room_id).map(Room::snapshot)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{expect_response, next_envelope, test_connection};
    use assert_approx_eq::assert_approx_eq;
    use shared::{AnimationParams, Vec3};

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Messenger::new())
    }

    fn mirrored_update(envelope: &Envelope) -> RoomPlayerUpdate {
        match &envelope.as_response().expect("response").data {
            Some(ResponseData::RoomPlayerUpdate(update)) => update.clone(),
            other => panic!("Expected room player update, got {:?}", other),
        }
    }

    #[test]
    fn test_room_id_is_order_dependent() {
        assert_eq!(room_id_for("P1", "P2"), "P1|P2");
        assert_eq!(room_id_for("P2", "P1"), "P2|P1");
    }

    #[tokio::test]
    async fn test_create_room_sends_snapshot_to_each() {
        let rooms = registry();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);

        let info = rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();

        assert_eq!(info.room_id, "P1|P2");
        assert_eq!(rooms.len().await, 1);
        assert_eq!(rooms.room_of("P1").await.as_deref(), Some("P1|P2"));
        assert_eq!(rooms.room_of("P2").await.as_deref(), Some("P1|P2"));

        for rx in [&mut rx1, &mut rx2] {
            let envelope =
                expect_response(rx, MessageKind::MatchmakingStart, ResponseCode::Success);
            match &envelope.as_response().unwrap().data {
                Some(ResponseData::RoomInfo(snapshot)) => {
                    assert_eq!(snapshot, &info);
                    assert_eq!(snapshot.player("P1"), Some(&PlayerState::new("P1")));
                    assert_eq!(snapshot.player("P2"), Some(&PlayerState::new("P2")));
                }
                other => panic!("Expected room snapshot, got {:?}", other),
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_duplicate_room_rejected() {
        let rooms = registry();
        let (c1, _rx1) = test_connection(1);
        let (c2, _rx2) = test_connection(2);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();

        let err = rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap_err();
        assert_eq!(err, RoomError::RoomExists("P1|P2".to_string()));
        assert_eq!(err.status(), ResponseCode::Conflict);
        assert_eq!(rooms.len().await, 1);
    }

    #[tokio::test]
    async fn test_player_cannot_sit_in_two_rooms() {
        let rooms = registry();
        let (c1, _rx1) = test_connection(1);
        let (c2, _rx2) = test_connection(2);
        let (c3, mut rx3) = test_connection(3);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();

        let err = rooms.create_room(("P3", &c3), ("P1", &c1)).await.unwrap_err();

        assert_eq!(
            err,
            RoomError::PlayerAlreadyInRoom {
                player_id: "P1".to_string(),
                room_id: "P1|P2".to_string()
            }
        );
        assert_eq!(rooms.room_of("P3").await, None);
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_position_update_reaches_only_other_occupant() {
        let rooms = registry();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        next_envelope(&mut rx1);
        next_envelope(&mut rx2);

        let mut moved = PlayerState::new("P1");
        moved.position = Vec3::new(10.0, 0.5, -4.0);
        moved.rotation = Vec3::new(0.0, 180.0, 0.0);
        moved.speed = 6.0;
        moved.health = 1.0;
        let update = RoomPlayerUpdate {
            room_id: "P1|P2".to_string(),
            player: moved,
        };

        rooms
            .update_player(UpdateKind::Position, &update, &c1)
            .await
            .unwrap();

        assert!(rx1.try_recv().is_err());
        let envelope =
            expect_response(&mut rx2, MessageKind::PlayerPositionUpdate, ResponseCode::Success);
        let mirrored = mirrored_update(&envelope);
        assert_eq!(mirrored.room_id, "P1|P2");
        assert_approx_eq!(mirrored.player.position.x, 10.0);
        assert_approx_eq!(mirrored.player.rotation.y, 180.0);
        assert_approx_eq!(mirrored.player.speed, 6.0);
        assert_eq!(mirrored.player.health, shared::DEFAULT_HEALTH);

        let stored = rooms.snapshot("P1|P2").await.unwrap();
        assert_approx_eq!(stored.player("P1").unwrap().position.z, -4.0);
        assert_eq!(stored.player("P2").unwrap(), &PlayerState::new("P2"));
    }

    #[tokio::test]
    async fn test_each_update_kind_uses_its_own_tag() {
        let rooms = registry();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        next_envelope(&mut rx1);
        next_envelope(&mut rx2);

        let mut state = PlayerState::new("P2");
        state.health = 35.0;
        state.weapon_type = 2;
        state.animation = AnimationParams {
            is_running: true,
            is_aiming: false,
            move_x: 1.0,
            move_y: 0.0,
            weapon_type: 2,
        };
        let update = RoomPlayerUpdate {
            room_id: "P1|P2".to_string(),
            player: state,
        };

        for kind in [UpdateKind::Health, UpdateKind::Weapon, UpdateKind::Animation] {
            rooms.update_player(kind, &update, &c2).await.unwrap();
            expect_response(&mut rx1, kind.message_kind(), ResponseCode::Success);
        }
        assert!(rx2.try_recv().is_err());

        let stored = rooms.snapshot("P1|P2").await.unwrap();
        let p2 = stored.player("P2").unwrap();
        assert_approx_eq!(p2.health, 35.0);
        assert_eq!(p2.weapon_type, 2);
        assert!(p2.animation.is_running);
        assert_eq!(p2.position, Vec3::default());
    }

    #[tokio::test]
    async fn test_update_unknown_room_mutates_nothing() {
        let rooms = registry();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        next_envelope(&mut rx1);
        next_envelope(&mut rx2);
        let before = rooms.snapshot("P1|P2").await.unwrap();

        let mut moved = PlayerState::new("P1");
        moved.position = Vec3::new(5.0, 5.0, 5.0);
        let update = RoomPlayerUpdate {
            room_id: "nowhere".to_string(),
            player: moved,
        };

        let err = rooms
            .update_player(UpdateKind::Position, &update, &c1)
            .await
            .unwrap_err();

        assert_eq!(err, RoomError::RoomNotFound("nowhere".to_string()));
        expect_response(&mut rx1, MessageKind::PlayerPositionUpdate, ResponseCode::NotFound);
        assert!(rx2.try_recv().is_err());
        assert_eq!(rooms.snapshot("P1|P2").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_unknown_player_in_room() {
        let rooms = registry();
        let (c1, _rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        let (c3, mut rx3) = test_connection(3);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        next_envelope(&mut rx2);

        let update = RoomPlayerUpdate {
            room_id: "P1|P2".to_string(),
            player: PlayerState::new("P3"),
        };
        let err = rooms
            .update_player(UpdateKind::Health, &update, &c3)
            .await
            .unwrap_err();

        assert!(matches!(err, RoomError::PlayerNotFound { .. }));
        expect_response(&mut rx3, MessageKind::PlayerHpUpdate, ResponseCode::NotFound);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_room_frees_seats_silently() {
        let rooms = registry();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        next_envelope(&mut rx1);
        next_envelope(&mut rx2);

        let removed = rooms.delete_room("P1|P2").await.unwrap();

        assert_eq!(removed.players.len(), 2);
        assert!(rooms.is_empty().await);
        assert_eq!(rooms.room_of("P1").await, None);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
        assert_eq!(
            rooms.delete_room("P1|P2").await.unwrap_err(),
            RoomError::RoomNotFound("P1|P2".to_string())
        );

        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        assert!(rooms.delete_room_of("P2").await.is_some());
        assert!(rooms.delete_room_of("P2").await.is_none());
    }

    #[tokio::test]
    async fn test_rebind_redirects_broadcasts() {
        let rooms = registry();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        let (c2_new, mut rx2_new) = test_connection(3);
        rooms.create_room(("P1", &c1), ("P2", &c2)).await.unwrap();
        next_envelope(&mut rx1);
        next_envelope(&mut rx2);

        assert!(rooms.rebind_connection("P2", &c2_new).await);
        assert!(!rooms.rebind_connection("P9", &c2_new).await);

        let update = RoomPlayerUpdate {
            room_id: "P1|P2".to_string(),
            player: PlayerState::new("P1"),
        };
        rooms
            .update_player(UpdateKind::Position, &update, &c1)
            .await
            .unwrap();

        expect_response(&mut rx2_new, MessageKind::PlayerPositionUpdate, ResponseCode::Success);
        assert!(rx2.try_recv().is_err());
    }
}
