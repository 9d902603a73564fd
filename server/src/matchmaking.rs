//! FIFO matchmaking queue
//!
//! Each request becomes a [`MatchEntry`] appended to the tail of the queue.
//! As soon as two entries are waiting, the two at the head are marked
//! matched, taken off the queue and seated in a new room. Pairing never
//! reorders or looks past the head of the queue.
//!
//! An entry moves `Waiting -> Matched` (irrevocable) or is removed by
//! cancellation while still waiting. Matched entries are kept aside so a late
//! cancel can be told the match is already complete.

use crate::connection::ConnectionHandle;
use crate::messenger::Messenger;
use crate::room::{RoomError, RoomRegistry};
use crate::session::SessionRegistry;
use log::{info, warn};
use shared::{MessageKind, ResponseCode};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchmakingError {
    #[error("player {0} is not logged in")]
    NotLoggedIn(String),
    #[error("player {0} is already waiting for a match")]
    AlreadyQueued(String),
    #[error("player {player_id} is already playing in room {room_id}")]
    AlreadyInRoom { player_id: String, room_id: String },
    #[error("cannot cancel, matchmaking already completed for player {0}")]
    AlreadyMatched(String),
    #[error("player {0} not found in matchmaking queue")]
    NotInQueue(String),
}

impl MatchmakingError {
    pub fn status(&self) -> ResponseCode {
        match self {
            MatchmakingError::NotLoggedIn(_) | MatchmakingError::NotInQueue(_) => {
                ResponseCode::NotFound
            }
            MatchmakingError::AlreadyQueued(_)
            | MatchmakingError::AlreadyInRoom { .. }
            | MatchmakingError::AlreadyMatched(_) => ResponseCode::Conflict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Waiting,
    Matched,
}

#[derive(Debug, Clone)]
pub struct MatchEntry {
    pub player_id: String,
    pub connection: ConnectionHandle,
    state: EntryState,
}

impl MatchEntry {
    fn new(player_id: String, connection: ConnectionHandle) -> Self {
        Self {
            player_id,
            connection,
            state: EntryState::Waiting,
        }
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn is_matched(&self) -> bool {
        self.state == EntryState::Matched
    }

    fn mark_matched(&mut self) {
        self.state = EntryState::Matched;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingOutcome {
    Waiting { queue_len: usize },
    Paired { room_id: String },
    /// Both entries were consumed but the room could not be created; both
    /// players have been told
    PairingFailed(RoomError),
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<MatchEntry>,
    matched: HashMap<String, MatchEntry>,
}

pub struct MatchmakingQueue {
    state: Mutex<QueueState>,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    messenger: Messenger,
}

impl MatchmakingQueue {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomRegistry>,
        messenger: Messenger,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            sessions,
            rooms,
            messenger,
        }
    }

    pub async fn start(
        &self,
        player_id: &str,
        requester: &ConnectionHandle,
    ) -> Result<MatchmakingOutcome, MatchmakingError> {
        let result = self.enqueue(player_id, requester).await;
        if let Err(err) = &result {
            self.messenger
                .respond(requester, MessageKind::MatchmakingStart, err.status(), err.to_string());
        }
        result
    }

    async fn enqueue(
        &self,
        player_id: &str,
        requester: &ConnectionHandle,
    ) -> Result<MatchmakingOutcome, MatchmakingError> {
        let session = self
            .sessions
            .lookup(player_id)
            .await
            .ok_or_else(|| MatchmakingError::NotLoggedIn(player_id.to_string()))?;

        // Held across room creation and the snapshot sends it queues
        let mut state = self.state.lock().await;

        if state.waiting.iter().any(|e| e.player_id == player_id) {
            return Err(MatchmakingError::AlreadyQueued(player_id.to_string()));
        }
        if let Some(room_id) = self.rooms.room_of(player_id).await {
            return Err(MatchmakingError::AlreadyInRoom {
                player_id: player_id.to_string(),
                room_id,
            });
        }

        state.matched.remove(player_id);
        state
            .waiting
            .push_back(MatchEntry::new(session.player_id, session.connection));
        let queue_len = state.waiting.len();
        info!(
            "Player {} added to matchmaking queue. Queue size: {}",
            player_id, queue_len
        );

        self.messenger.respond(
            requester,
            MessageKind::MatchmakingStart,
            ResponseCode::Success,
            "matchmaking queued, waiting for an opponent",
        );

        if queue_len < 2 {
            return Ok(MatchmakingOutcome::Waiting { queue_len });
        }

        match (state.waiting.pop_front(), state.waiting.pop_front()) {
            (Some(first), Some(second)) => Ok(self.pair(&mut state, first, second).await),
            _ => Ok(MatchmakingOutcome::Waiting { queue_len }),
        }
    }

    /// Seats the two entries taken from the head of the queue
    async fn pair(
        &self,
        state: &mut QueueState,
        mut first: MatchEntry,
        mut second: MatchEntry,
    ) -> MatchmakingOutcome {
        first.mark_matched();
        second.mark_matched();
        info!(
            "Match found between {} and {}",
            first.player_id, second.player_id
        );

        let result = self
            .rooms
            .create_room(
                (first.player_id.as_str(), &first.connection),
                (second.player_id.as_str(), &second.connection),
            )
            .await;

        let outcome = match result {
            Ok(room) => MatchmakingOutcome::Paired {
                room_id: room.room_id,
            },
            Err(err) => {
                warn!(
                    "Failed to create room for {} and {}: {}",
                    first.player_id, second.player_id, err
                );
                for entry in [&first, &second] {
                    self.messenger.respond(
                        &entry.connection,
                        MessageKind::MatchmakingStart,
                        err.status(),
                        err.to_string(),
                    );
                }
                MatchmakingOutcome::PairingFailed(err)
            }
        };

        state.matched.insert(first.player_id.clone(), first);
        state.matched.insert(second.player_id.clone(), second);
        outcome
    }

    pub async fn cancel(
        &self,
        player_id: &str,
        requester: &ConnectionHandle,
    ) -> Result<(), MatchmakingError> {
        let mut state = self.state.lock().await;

        let position = state.waiting.iter().position(|e| e.player_id == player_id);
        let result = if let Some(index) = position {
            state.waiting.remove(index);
            info!(
                "Player {} left matchmaking queue. Queue size: {}",
                player_id,
                state.waiting.len()
            );
            Ok(())
        } else if state.matched.get(player_id).is_some_and(MatchEntry::is_matched) {
            Err(MatchmakingError::AlreadyMatched(player_id.to_string()))
        } else {
            Err(MatchmakingError::NotInQueue(player_id.to_string()))
        };

        match &result {
            Ok(()) => self.messenger.respond(
                requester,
                MessageKind::MatchmakingCancel,
                ResponseCode::Success,
                "matchmaking cancelled",
            ),
            Err(err) => self.messenger.respond(
                requester,
                MessageKind::MatchmakingCancel,
                err.status(),
                err.to_string(),
            ),
        }
        result
    }

    /// Drops every trace of `player_id` without replying; used on logout
    pub async fn forget(&self, player_id: &str) {
        let mut state = self.state.lock().await;
        state.waiting.retain(|e| e.player_id != player_id);
        state.matched.remove(player_id);
    }

    /// Points a waiting entry at the connection the player logged in from
    /// last, so the room snapshot and later broadcasts follow the session.
    /// Returns false if the player is not waiting.
    pub async fn rebind_connection(&self, player_id: &str, connection: &ConnectionHandle) -> bool {
        let mut state = self.state.lock().await;
        match state.waiting.iter_mut().find(|e| e.player_id == player_id) {
            Some(entry) => {
                entry.connection = connection.clone();
                true
            }
            None => false,
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    pub async fn entry_state(&self, player_id: &str) -> Option<EntryState> {
        let state = self.state.lock().await;
        state
            .waiting
            .iter()
            .find(|e| e.player_id == player_id)
            .or_else(|| state.matched.get(player_id))
            .map(MatchEntry::state)
    }
}
