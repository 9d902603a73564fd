//! Envelope router
//!
//! Inspects the message kind and payload variant of a decoded envelope
//! together and hands it to the registry that owns that domain. Domain
//! failures have already been answered to the requester by the registry, so
//! the router only logs them. Kind/payload combinations that make no sense
//! are logged and dropped; the connection stays open.

use crate::connection::ConnectionHandle;
use crate::matchmaking::MatchmakingQueue;
use crate::messenger::Messenger;
use crate::room::{RoomRegistry, UpdateKind};
use crate::session::{LoginOutcome, SessionRegistry};
use log::{debug, info, warn};
use shared::{Envelope, MessageKind, Payload, PlayerRequest, RoomPlayerUpdate};
use std::sync::Arc;

/// Where an envelope ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Session,
    Matchmaking,
    Room,
    Telemetry,
    Dropped,
}

pub struct Router {
    sessions: Arc<SessionRegistry>,
    matchmaking: Arc<MatchmakingQueue>,
    rooms: Arc<RoomRegistry>,
}

impl Router {
    /// Builds a fresh, isolated set of registries
    pub fn new() -> Self {
        let messenger = Messenger::new();
        let sessions = Arc::new(SessionRegistry::new(messenger.clone()));
        let rooms = Arc::new(RoomRegistry::new(messenger.clone()));
        let matchmaking = Arc::new(MatchmakingQueue::new(
            Arc::clone(&sessions),
            Arc::clone(&rooms),
            messenger,
        ));

        Self {
            sessions,
            matchmaking,
            rooms,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn matchmaking(&self) -> &Arc<MatchmakingQueue> {
        &self.matchmaking
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub async fn route(&self, envelope: Envelope, connection: &ConnectionHandle) -> Route {
        debug!("Routing {:?} from connection {}", envelope.kind, connection.id());

        match (envelope.kind, envelope.payload) {
            (MessageKind::SessionLogin, Payload::PlayerRequest(request)) => {
                self.login(request, connection).await;
                Route::Session
            }
            (MessageKind::SessionLogout, Payload::PlayerRequest(request)) => {
                self.logout(request, connection).await;
                Route::Session
            }
            (MessageKind::MatchmakingStart, Payload::PlayerRequest(request)) => {
                if let Err(e) = self.matchmaking.start(&request.player_id, connection).await {
                    info!("Matchmaking from {} rejected: {}", request.player_id, e);
                }
                Route::Matchmaking
            }
            (MessageKind::MatchmakingCancel, Payload::PlayerRequest(request)) => {
                if let Err(e) = self.matchmaking.cancel(&request.player_id, connection).await {
                    info!("Cancel from {} rejected: {}", request.player_id, e);
                }
                Route::Matchmaking
            }
            (MessageKind::PlayerPositionUpdate, Payload::RoomPlayerUpdate(update)) => {
                self.update_room(UpdateKind::Position, update, connection).await
            }
            (MessageKind::PlayerHpUpdate, Payload::RoomPlayerUpdate(update)) => {
                self.update_room(UpdateKind::Health, update, connection).await
            }
            (MessageKind::PlayerChangeWeapon, Payload::RoomPlayerUpdate(update)) => {
                self.update_room(UpdateKind::Weapon, update, connection).await
            }
            (MessageKind::PlayerAnimation, Payload::RoomPlayerUpdate(update)) => {
                self.update_room(UpdateKind::Animation, update, connection).await
            }
            (_, Payload::PositionReport(report)) => {
                info!(
                    "Position report from {}: ({:.3}, {:.3}, {:.3})",
                    report.player_id, report.x, report.y, report.z
                );
                Route::Telemetry
            }
            (kind, payload) => {
                warn!(
                    "Unexpected message from {}: {:?} with {} payload",
                    connection.peer(),
                    kind,
                    payload_name(&payload)
                );
                Route::Dropped
            }
        }
    }

    async fn login(&self, request: PlayerRequest, connection: &ConnectionHandle) {
        if let Ok(LoginOutcome::Rebound { .. }) =
            self.sessions.login(&request.player_id, connection).await
        {
            if self
                .matchmaking
                .rebind_connection(&request.player_id, connection)
                .await
            {
                info!(
                    "Queue entry of {} moved to connection {}",
                    request.player_id,
                    connection.id()
                );
            }
            if self.rooms.rebind_connection(&request.player_id, connection).await {
                info!(
                    "Room seat of {} moved to connection {}",
                    request.player_id,
                    connection.id()
                );
            }
        }
    }

    async fn logout(&self, request: PlayerRequest, connection: &ConnectionHandle) {
        if self.sessions.logout(&request.player_id, connection).await.is_err() {
            return;
        }
        self.matchmaking.forget(&request.player_id).await;
        if let Some(room) = self.rooms.delete_room_of(&request.player_id).await {
            info!("Room {} closed after {} logged out", room.room_id, request.player_id);
        }
    }

    async fn update_room(
        &self,
        kind: UpdateKind,
        update: RoomPlayerUpdate,
        connection: &ConnectionHandle,
    ) -> Route {
        if let Err(e) = self.rooms.update_player(kind, &update, connection).await {
            info!("{:?} update from {} rejected: {}", kind, update.player.player_id, e);
        }
        Route::Room
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_name(payload: &Payload) -> &'static str {
    match payload {
        Payload::PlayerRequest(_) => "player request",
        Payload::RoomPlayerUpdate(_) => "room player update",
        Payload::PositionReport(_) => "position report",
        Payload::Response(_) => "response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::EntryState;
    use crate::test_support::{expect_response, next_envelope, test_connection};
    use shared::{PlayerState, PositionReport, ResponseCode, ResponseData, Vec3};

    #[tokio::test]
    async fn test_scenario_two_players_matchmake() {
        let router = Router::new();
        let (c1, mut rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);

        for (conn, player) in [(&c1, "P1"), (&c2, "P2")] {
            let login = Envelope::player_request(MessageKind::SessionLogin, player);
            assert_eq!(router.route(login, conn).await, Route::Session);
        }
        for (conn, player) in [(&c1, "P1"), (&c2, "P2")] {
            let start = Envelope::player_request(MessageKind::MatchmakingStart, player);
            assert_eq!(router.route(start, conn).await, Route::Matchmaking);
        }

        assert!(router.rooms().snapshot("P1|P2").await.is_some());

        for rx in [&mut rx1, &mut rx2] {
            expect_response(rx, MessageKind::SessionLogin, ResponseCode::Success);
            expect_response(rx, MessageKind::MatchmakingStart, ResponseCode::Success);
            let envelope =
                expect_response(rx, MessageKind::MatchmakingStart, ResponseCode::Success);
            match &envelope.as_response().unwrap().data {
                Some(ResponseData::RoomInfo(info)) => {
                    assert_eq!(info.room_id, "P1|P2");
                    assert_eq!(info.player("P1"), Some(&PlayerState::new("P1")));
                    assert_eq!(info.player("P2"), Some(&PlayerState::new("P2")));
                }
                other => panic!("Expected room snapshot, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_scenario_start_then_cancel() {
        let router = Router::new();
        let (c1, mut rx1) = test_connection(1);

        router
            .route(Envelope::player_request(MessageKind::SessionLogin, "P1"), &c1)
            .await;
        router
            .route(Envelope::player_request(MessageKind::MatchmakingStart, "P1"), &c1)
            .await;
        assert_eq!(router.matchmaking().queue_len().await, 1);

        router
            .route(Envelope::player_request(MessageKind::MatchmakingCancel, "P1"), &c1)
            .await;

        assert_eq!(router.matchmaking().queue_len().await, 0);
        assert!(router.rooms().is_empty().await);
        next_envelope(&mut rx1);
        next_envelope(&mut rx1);
        expect_response(&mut rx1, MessageKind::MatchmakingCancel, ResponseCode::Success);
    }

    #[tokio::test]
    async fn test_update_for_missing_room_reports_not_found() {
        let router = Router::new();
        let (c1, mut rx1) = test_connection(1);

        let mut player = PlayerState::new("P1");
        player.position = Vec3::new(1.0, 1.0, 1.0);
        let envelope = Envelope::room_update(MessageKind::PlayerPositionUpdate, "missing", player);

        assert_eq!(router.route(envelope, &c1).await, Route::Room);
        expect_response(&mut rx1, MessageKind::PlayerPositionUpdate, ResponseCode::NotFound);
        assert!(router.rooms().is_empty().await);
    }

    #[tokio::test]
    async fn test_mismatched_kind_and_payload_dropped() {
        let router = Router::new();
        let (c1, mut rx1) = test_connection(1);

        let wrong =
            Envelope::room_update(MessageKind::SessionLogin, "P1|P2", PlayerState::new("P1"));
        assert_eq!(router.route(wrong, &c1).await, Route::Dropped);

        let reply = Envelope::response(MessageKind::SessionLogin, ResponseCode::Success, "echo");
        assert_eq!(router.route(reply, &c1).await, Route::Dropped);

        let identity_update = Envelope::player_request(MessageKind::PlayerHpUpdate, "P1");
        assert_eq!(router.route(identity_update, &c1).await, Route::Dropped);

        assert!(rx1.try_recv().is_err());
        assert!(router.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_position_report_only_logged() {
        let router = Router::new();
        let (c1, mut rx1) = test_connection(1);
        let report = Envelope::new(
            MessageKind::PlayerPositionUpdate,
            Payload::PositionReport(PositionReport {
                player_id: "P1".to_string(),
                x: 1.0,
                y: 2.0,
                z: 3.0,
            }),
        );

        assert_eq!(router.route(report, &c1).await, Route::Telemetry);
        assert!(rx1.try_recv().is_err());
        assert!(router.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_relogin_moves_room_seat() {
        let router = Router::new();
        let (c1, _rx1) = test_connection(1);
        let (c2, mut rx2) = test_connection(2);
        let (c2_new, mut rx2_new) = test_connection(3);

        for (conn, player) in [(&c1, "P1"), (&c2, "P2")] {
            router
                .route(Envelope::player_request(MessageKind::SessionLogin, player), conn)
                .await;
            router
                .route(Envelope::player_request(MessageKind::MatchmakingStart, player), conn)
                .await;
        }
        router
            .route(Envelope::player_request(MessageKind::SessionLogin, "P2"), &c2_new)
            .await;
        expect_response(&mut rx2_new, MessageKind::SessionLogin, ResponseCode::Conflict);
        while rx2.try_recv().is_ok() {}

        let update =
            Envelope::room_update(MessageKind::PlayerHpUpdate, "P1|P2", PlayerState::new("P1"));
        router.route(update, &c1).await;

        expect_response(&mut rx2_new, MessageKind::PlayerHpUpdate, ResponseCode::Success);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relogin_while_queued_moves_match_to_new_connection() {
        let router = Router::new();
        let (c1_old, mut rx1_old) = test_connection(1);
        let (c1_new, mut rx1_new) = test_connection(2);
        let (c2, mut rx2) = test_connection(3);

        router
            .route(Envelope::player_request(MessageKind::SessionLogin, "P1"), &c1_old)
            .await;
        router
            .route(Envelope::player_request(MessageKind::MatchmakingStart, "P1"), &c1_old)
            .await;
        router
            .route(Envelope::player_request(MessageKind::SessionLogin, "P1"), &c1_new)
            .await;
        expect_response(&mut rx1_new, MessageKind::SessionLogin, ResponseCode::Conflict);

        for kind in [MessageKind::SessionLogin, MessageKind::MatchmakingStart] {
            router.route(Envelope::player_request(kind, "P2"), &c2).await;
        }

        let envelope =
            expect_response(&mut rx1_new, MessageKind::MatchmakingStart, ResponseCode::Success);
        match &envelope.as_response().unwrap().data {
            Some(ResponseData::RoomInfo(info)) => assert_eq!(info.room_id, "P1|P2"),
            other => panic!("Expected room snapshot, got {:?}", other),
        }

        // Only the login and queue acknowledgements reached the old connection
        expect_response(&mut rx1_old, MessageKind::SessionLogin, ResponseCode::Success);
        expect_response(&mut rx1_old, MessageKind::MatchmakingStart, ResponseCode::Success);
        assert!(rx1_old.try_recv().is_err());

        while rx2.try_recv().is_ok() {}
        let update =
            Envelope::room_update(MessageKind::PlayerHpUpdate, "P1|P2", PlayerState::new("P2"));
        router.route(update, &c2).await;

        expect_response(&mut rx1_new, MessageKind::PlayerHpUpdate, ResponseCode::Success);
        assert!(rx1_old.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logout_tears_down_room_and_queue() {
        let router = Router::new();
        let (c1, _rx1) = test_connection(1);
        let (c2, _rx2) = test_connection(2);
        let (c3, mut rx3) = test_connection(3);

        for (conn, player) in [(&c1, "P1"), (&c2, "P2"), (&c3, "P3")] {
            router
                .route(Envelope::player_request(MessageKind::SessionLogin, player), conn)
                .await;
            router
                .route(Envelope::player_request(MessageKind::MatchmakingStart, player), conn)
                .await;
        }
        assert_eq!(router.matchmaking().entry_state("P3").await, Some(EntryState::Waiting));

        router
            .route(Envelope::player_request(MessageKind::SessionLogout, "P1"), &c1)
            .await;
        router
            .route(Envelope::player_request(MessageKind::SessionLogout, "P3"), &c3)
            .await;

        assert!(router.rooms().is_empty().await);
        assert_eq!(router.matchmaking().queue_len().await, 0);
        assert_eq!(router.matchmaking().entry_state("P1").await, None);
        assert!(!router.sessions().contains("P1").await);
        assert!(router.sessions().contains("P2").await);

        next_envelope(&mut rx3);
        next_envelope(&mut rx3);
        expect_response(&mut rx3, MessageKind::SessionLogout, ResponseCode::Success);
    }
}
