//! Session registry: binds player identifiers to their current connection
//!
//! This module handles the login/logout lifecycle of players:
//! - Login creates a session, or rebinds an existing one to the new
//!   connection (last write wins) and reports a conflict
//! - Logout removes the session
//! - Lookup resolves an identifier for the matchmaking queue
//!
//! Sessions never expire. A session outlives its connection until the player
//! logs out explicitly; a previous connection is never closed by this
//! registry.

use crate::connection::ConnectionHandle;
use crate::messenger::{Messenger, Outgoing};
use log::info;
use shared::{Envelope, MessageKind, ResponseCode};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("player id must not be empty")]
    InvalidPlayerId,
    #[error("player {0} is not logged in")]
    NotFound(String),
}

impl SessionError {
    pub fn status(&self) -> ResponseCode {
        match self {
            SessionError::InvalidPlayerId => ResponseCode::BadRequest,
            SessionError::NotFound(_) => ResponseCode::NotFound,
        }
    }
}

/// A logged-in player and the connection their messages currently go to
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: String,
    pub connection: ConnectionHandle,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Created,
    /// The identifier was already logged in; the session now points at the
    /// new connection and `previous` is left open
    Rebound { previous: ConnectionHandle },
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    messenger: Messenger,
}

impl SessionRegistry {
    pub fn new(messenger: Messenger) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            messenger,
        }
    }

    pub async fn login(
        &self,
        player_id: &str,
        connection: &ConnectionHandle,
    ) -> Result<LoginOutcome, SessionError> {
        if player_id.is_empty() {
            let err = SessionError::InvalidPlayerId;
            self.messenger
                .respond(connection, MessageKind::SessionLogin, err.status(), err.to_string());
            return Err(err);
        }

        let mut sessions = self.sessions.lock().await;

        let (outcome, reply) = match sessions.get_mut(player_id) {
            Some(session) => {
                let previous = std::mem::replace(&mut session.connection, connection.clone());
                info!(
                    "Player {} logged in again from {} (was connection {})",
                    player_id,
                    connection.peer(),
                    previous.id()
                );
                let reply = Envelope::response(
                    MessageKind::SessionLogin,
                    ResponseCode::Conflict,
                    format!(
                        "player {} was already logged in; session moved to this connection",
                        player_id
                    ),
                );
                (LoginOutcome::Rebound { previous }, reply)
            }
            None => {
                sessions.insert(
                    player_id.to_string(),
                    Session {
                        player_id: player_id.to_string(),
                        connection: connection.clone(),
                    },
                );
                info!("Player {} logged in from {}", player_id, connection.peer());
                let reply = Envelope::response(
                    MessageKind::SessionLogin,
                    ResponseCode::Success,
                    format!("player {} logged in", player_id),
                );
                (LoginOutcome::Created, reply)
            }
        };

        self.messenger.deliver(vec![Outgoing::new(connection, reply)]);
        Ok(outcome)
    }

    pub async fn logout(
        &self,
        player_id: &str,
        requester: &ConnectionHandle,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.lock().await;

        match sessions.remove(player_id) {
            Some(session) => {
                info!("Player {} logged out", player_id);
                self.messenger.respond(
                    requester,
                    MessageKind::SessionLogout,
                    ResponseCode::Success,
                    format!("player {} logged out", player_id),
                );
                Ok(session)
            }
            None => {
                let err = SessionError::NotFound(player_id.to_string());
                self.messenger
                    .respond(requester, MessageKind::SessionLogout, err.status(), err.to_string());
                Err(err)
            }
        }
    }

    pub async fn lookup(&self, player_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(player_id).cloned()
    }

    pub async fn contains(&self, player_id: &str) -> bool {
        self.sessions.lock().await.contains_key(player_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
