use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

use crate::events::ServerEvent;
use crate::lobby::{LobbyId, UserId};

/// Subscription channel key. `User` is the personal channel, `Lobby` the
/// broadcast channel shared by the owner and all members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    User(UserId),
    Lobby(LobbyId),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::User(id) => write!(f, "user-{id}"),
            RoomKey::Lobby(id) => write!(f, "lobby-{id}"),
        }
    }
}

/// A live authenticated connection. The room set is fixed when the session
/// is registered; clients reconnect to pick up new lobby subscriptions.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: Uuid,
    pub user_id: UserId,
    pub rooms: HashSet<RoomKey>,
    pub sender: UnboundedSender<Message>,
}

/// Concurrency-safe index of connected identities. At most one session per
/// user; a reconnect replaces the prior entry. The map is never handed out
/// for direct mutation.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    sessions: Arc<Mutex<HashMap<UserId, Session>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a session, replacing any prior entry for the same user.
    /// The replaced sender is dropped, which ends the old socket's forward
    /// task.
    pub fn register(&self, session: Session) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.user_id, session);
    }

    /// Idempotent removal. Only removes the entry if it still belongs to
    /// `connection_id`, so the teardown of a replaced session cannot evict
    /// its successor.
    pub fn unregister(&self, user_id: &UserId, connection_id: &Uuid) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(user_id) {
            if session.connection_id == *connection_id {
                sessions.remove(user_id);
            }
        }
    }

    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.sessions.lock().unwrap().contains_key(user_id)
    }

    /// Pushes an event to every session subscribed to `room`. Best-effort,
    /// at-most-once: disconnected or broken subscribers are skipped without
    /// surfacing an error to the caller.
    pub fn publish(&self, room: &RoomKey, event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to serialize event for {room}: {e}");
                return;
            }
        };
        let sessions = self.sessions.lock().unwrap();
        for session in sessions.values().filter(|s| s.rooms.contains(room)) {
            if session.sender.send(Message::Text(text.clone())).is_err() {
                warn!(user_id = %session.user_id, "dropping event for closed session");
            }
        }
    }
}
