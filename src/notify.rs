use chrono::Utc;

use crate::events::ServerEvent;
use crate::lobby::{LobbyId, RequestStatus, UserId, Visibility};
use crate::registry::{ConnectionRegistry, RoomKey};

/// Resolves domain events to their target rooms and pushes them through the
/// connection registry. All delivery is fire-and-forget; the coordinator
/// never learns whether a recipient was connected.
#[derive(Debug, Clone)]
pub struct Notifier {
    registry: ConnectionRegistry,
}

impl Notifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// A new join request goes to the owner's personal channel only.
    pub fn join_request(&self, owner_id: UserId, requester_id: UserId, username: String) {
        self.registry.publish(
            &RoomKey::User(owner_id),
            &ServerEvent::JoinRequest {
                user_id: requester_id,
                username,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn request_cancelled(&self, lobby_id: LobbyId, requester_id: UserId) {
        self.registry.publish(
            &RoomKey::Lobby(lobby_id),
            &ServerEvent::RequestCancelled {
                user_id: requester_id,
                timestamp: Utc::now(),
            },
        );
    }

    /// Outcome of a request (or a kick), delivered to the affected user.
    pub fn request_updated(&self, target_id: UserId, lobby_id: LobbyId, status: RequestStatus) {
        self.registry.publish(
            &RoomKey::User(target_id),
            &ServerEvent::request_updated(lobby_id, status),
        );
    }

    pub fn member_joined(&self, lobby_id: LobbyId, user_id: UserId, username: String) {
        self.registry.publish(
            &RoomKey::Lobby(lobby_id),
            &ServerEvent::MemberJoined {
                user_id,
                username,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn member_left(&self, lobby_id: LobbyId, user_id: UserId, username: String) {
        self.registry.publish(
            &RoomKey::Lobby(lobby_id),
            &ServerEvent::MemberLeft {
                user_id,
                username,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn visibility_changed(&self, lobby_id: LobbyId, visibility: Visibility) {
        self.registry.publish(
            &RoomKey::Lobby(lobby_id),
            &ServerEvent::VisibilityChanged {
                visibility,
                timestamp: Utc::now(),
            },
        );
    }
}
