use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::lobby::{
    JoinRequest, Lobby, LobbyId, LobbyView, PendingRequestView, RequestStatus, User, UserId,
    UserProfile, Visibility, DEFAULT_CAPACITY,
};
use crate::notify::Notifier;
use crate::store::{MembershipStore, Txn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

fn default_capacity() -> u32 {
    DEFAULT_CAPACITY
}

/// Owns all writes to lobby/membership/join-request state. Every operation
/// runs its checks and mutations inside a single store transaction, so
/// concurrent callers cannot overcommit capacity or double-process a
/// request; events are emitted only after the transaction has committed.
#[derive(Clone)]
pub struct LobbyCoordinator {
    store: Arc<MembershipStore>,
    notify: Notifier,
}

impl LobbyCoordinator {
    pub fn new(store: Arc<MembershipStore>, notify: Notifier) -> Self {
        Self { store, notify }
    }

    /// Identity stand-in used by the login endpoint: looks the user up by
    /// username, creating the record on first sight.
    pub fn find_or_create_user(&self, username: &str) -> Result<User, ApiError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ApiError::BadRequest("Username must not be empty".into()));
        }
        self.store.transact(|txn| {
            if let Some(user) = txn.find_user_by_username(username) {
                return Ok(user.clone());
            }
            let user = User::new(username.to_string());
            txn.insert_user(user.clone());
            info!(user_id = %user.id, username, "registered new user");
            Ok(user)
        })
    }

    pub fn create_lobby(
        &self,
        spec: CreateLobbySpec,
        requester: UserId,
    ) -> Result<LobbyView, ApiError> {
        if spec.name.trim().is_empty() {
            return Err(ApiError::BadRequest("Lobby name must not be empty".into()));
        }
        if spec.capacity == 0 {
            return Err(ApiError::BadRequest(
                "Lobby capacity must be at least 1".into(),
            ));
        }
        let view = self.store.transact(|txn| {
            let user = txn.user(&requester)?;
            if user.is_affiliated() {
                return Err(ApiError::Conflict(
                    "User already belongs to a lobby".into(),
                ));
            }
            let now = Utc::now();
            let lobby = Lobby {
                id: Uuid::new_v4(),
                name: spec.name.trim().to_string(),
                description: spec.description,
                image_url: spec.image_url,
                visibility: spec.visibility,
                capacity: spec.capacity,
                owner_id: requester,
                members: std::iter::once(requester).collect(),
                created_at: now,
                updated_at: now,
            };
            let user = txn.user_mut(&requester)?;
            user.owned_lobby = Some(lobby.id);
            user.member_lobby = Some(lobby.id);
            txn.insert_lobby(lobby.clone());
            lobby_view(txn, &lobby)
        })?;
        info!(lobby_id = %view.id, owner = %requester, "lobby created");
        self.notify
            .member_joined(view.id, view.owner.id, view.owner.username.clone());
        Ok(view)
    }

    pub fn create_join_request(
        &self,
        lobby_id: LobbyId,
        requester: UserId,
    ) -> Result<(), ApiError> {
        let (owner_id, username) = self.store.transact(|txn| {
            let user = txn.user(&requester)?;
            if user.is_affiliated() {
                return Err(ApiError::Conflict(
                    "User already belongs to a lobby".into(),
                ));
            }
            // One outstanding request across all lobbies, a product rule on
            // top of the store's per-pair uniqueness.
            if let Some(pending) = txn.pending_for_user(&requester) {
                let message = if pending.lobby_id == lobby_id {
                    "A join request for this lobby already exists"
                } else {
                    "User already has a pending join request"
                };
                return Err(ApiError::Conflict(message.into()));
            }
            let lobby = txn.lobby(&lobby_id)?;
            let owner_id = lobby.owner_id;
            let username = user.username.clone();
            txn.insert_join_request(JoinRequest {
                user_id: requester,
                lobby_id,
                created_at: Utc::now(),
            })?;
            Ok((owner_id, username))
        })?;
        info!(lobby_id = %lobby_id, user_id = %requester, "join request created");
        self.notify.join_request(owner_id, requester, username);
        Ok(())
    }

    /// Tolerant of an already-cancelled request; the cancellation event is
    /// only emitted when a request was actually removed.
    pub fn cancel_join_request(
        &self,
        lobby_id: LobbyId,
        requester: UserId,
    ) -> Result<(), ApiError> {
        let removed = self.store.transact(|txn| -> Result<bool, ApiError> {
            Ok(txn.remove_join_request(&requester, &lobby_id).is_some())
        })?;
        if removed {
            info!(lobby_id = %lobby_id, user_id = %requester, "join request cancelled");
            self.notify.request_cancelled(lobby_id, requester);
        }
        Ok(())
    }

    pub fn approve_join_request(
        &self,
        lobby_id: LobbyId,
        target: UserId,
        owner: UserId,
    ) -> Result<(), ApiError> {
        let username = self.store.transact(|txn| {
            let lobby = txn.lobby(&lobby_id)?;
            if lobby.owner_id != owner {
                return Err(ApiError::Forbidden(
                    "Only the lobby owner may approve join requests".into(),
                ));
            }
            // Re-checked at approval time: several requests can be pending
            // while the lobby is already at capacity.
            if lobby.is_full() {
                return Err(ApiError::Conflict(
                    "Lobby has reached maximum capacity".into(),
                ));
            }
            txn.remove_join_request(&target, &lobby_id)
                .ok_or_else(|| ApiError::NotFound("Join request not found".into()))?;
            let user = txn.user_mut(&target)?;
            if user.is_affiliated() {
                return Err(ApiError::Conflict(
                    "User already belongs to a lobby".into(),
                ));
            }
            user.member_lobby = Some(lobby_id);
            let username = user.username.clone();
            let lobby = txn.lobby_mut(&lobby_id)?;
            lobby.members.insert(target);
            lobby.updated_at = Utc::now();
            Ok(username)
        })?;
        info!(lobby_id = %lobby_id, user_id = %target, "join request approved");
        self.notify
            .request_updated(target, lobby_id, RequestStatus::Accepted);
        self.notify.member_joined(lobby_id, target, username);
        Ok(())
    }

    pub fn reject_join_request(
        &self,
        lobby_id: LobbyId,
        target: UserId,
        owner: UserId,
    ) -> Result<(), ApiError> {
        self.store.transact(|txn| {
            let lobby = txn.lobby(&lobby_id)?;
            if lobby.owner_id != owner {
                return Err(ApiError::Forbidden(
                    "Only the lobby owner may reject join requests".into(),
                ));
            }
            txn.remove_join_request(&target, &lobby_id)
                .ok_or_else(|| ApiError::NotFound("Join request not found".into()))?;
            Ok(())
        })?;
        info!(lobby_id = %lobby_id, user_id = %target, "join request rejected");
        self.notify
            .request_updated(target, lobby_id, RequestStatus::Rejected);
        Ok(())
    }

    pub fn pending_requests(
        &self,
        lobby_id: LobbyId,
        owner: UserId,
    ) -> Result<Vec<PendingRequestView>, ApiError> {
        self.store.transact(|txn| {
            let lobby = txn.lobby(&lobby_id)?;
            if lobby.owner_id != owner {
                return Err(ApiError::Forbidden(
                    "Only the lobby owner may list join requests".into(),
                ));
            }
            let mut views = Vec::new();
            for request in txn.pending_for_lobby(&lobby_id) {
                let user = txn.user(&request.user_id)?;
                views.push(PendingRequestView {
                    user_id: user.id,
                    username: user.username.clone(),
                    requested_at: request.created_at,
                });
            }
            Ok(views)
        })
    }

    pub fn leave_lobby(&self, user_id: UserId) -> Result<(), ApiError> {
        let (lobby_id, username) = self.store.transact(|txn| {
            let user = txn.user(&user_id)?;
            let lobby_id = user.member_lobby.ok_or_else(|| {
                ApiError::BadRequest("User does not belong to a lobby".into())
            })?;
            if user.owned_lobby == Some(lobby_id) {
                return Err(ApiError::Conflict(
                    "The owner cannot leave their own lobby".into(),
                ));
            }
            let username = user.username.clone();
            let user = txn.user_mut(&user_id)?;
            user.member_lobby = None;
            let lobby = txn.lobby_mut(&lobby_id)?;
            lobby.members.remove(&user_id);
            lobby.updated_at = Utc::now();
            Ok((lobby_id, username))
        })?;
        info!(lobby_id = %lobby_id, user_id = %user_id, "member left lobby");
        self.notify.member_left(lobby_id, user_id, username);
        Ok(())
    }

    pub fn remove_member(
        &self,
        lobby_id: LobbyId,
        target: UserId,
        owner: UserId,
    ) -> Result<(), ApiError> {
        let username = self.store.transact(|txn| {
            let lobby = txn.lobby(&lobby_id)?;
            if lobby.owner_id != owner {
                return Err(ApiError::Forbidden(
                    "Only the lobby owner may remove members".into(),
                ));
            }
            if target == lobby.owner_id {
                return Err(ApiError::Conflict(
                    "The lobby owner cannot be removed".into(),
                ));
            }
            if !lobby.is_member(&target) {
                return Err(ApiError::Conflict(
                    "User is not a member of this lobby".into(),
                ));
            }
            let user = txn.user_mut(&target)?;
            user.member_lobby = None;
            let username = user.username.clone();
            let lobby = txn.lobby_mut(&lobby_id)?;
            lobby.members.remove(&target);
            lobby.updated_at = Utc::now();
            Ok(username)
        })?;
        info!(lobby_id = %lobby_id, user_id = %target, "member removed by owner");
        self.notify
            .request_updated(target, lobby_id, RequestStatus::Kicked);
        self.notify.member_left(lobby_id, target, username);
        Ok(())
    }

    pub fn update_visibility(
        &self,
        lobby_id: LobbyId,
        owner: UserId,
        visibility: Visibility,
    ) -> Result<LobbyView, ApiError> {
        let view = self.store.transact(|txn| {
            let lobby = txn.lobby(&lobby_id)?;
            if lobby.owner_id != owner {
                return Err(ApiError::Forbidden(
                    "Only the lobby owner may change visibility".into(),
                ));
            }
            let lobby = txn.lobby_mut(&lobby_id)?;
            lobby.visibility = visibility;
            lobby.updated_at = Utc::now();
            let lobby = lobby.clone();
            lobby_view(txn, &lobby)
        })?;
        info!(lobby_id = %lobby_id, ?visibility, "lobby visibility changed");
        self.notify.visibility_changed(lobby_id, visibility);
        Ok(view)
    }

    pub fn get_lobby(&self, lobby_id: LobbyId, requester: UserId) -> Result<LobbyView, ApiError> {
        self.store.transact(|txn| {
            let lobby = txn.lobby(&lobby_id)?.clone();
            if lobby.visibility == Visibility::Private
                && lobby.owner_id != requester
                && !lobby.is_member(&requester)
            {
                return Err(ApiError::Forbidden("This lobby is private".into()));
            }
            lobby_view(txn, &lobby)
        })
    }

    pub fn get_my_lobby(&self, requester: UserId) -> Result<LobbyView, ApiError> {
        self.store.transact(|txn| {
            let user = txn.user(&requester)?;
            let lobby_id = user.member_lobby.ok_or_else(|| {
                ApiError::NotFound("User does not belong to a lobby".into())
            })?;
            let lobby = txn.lobby(&lobby_id)?.clone();
            lobby_view(txn, &lobby)
        })
    }

    /// Current lobby affiliation, used by the gateway to resolve room
    /// subscriptions at connect time.
    pub fn lobby_hints(&self, user_id: &UserId) -> (Option<LobbyId>, Option<LobbyId>) {
        let hints: Result<(Option<LobbyId>, Option<LobbyId>), ApiError> =
            self.store.transact(|txn| {
                Ok(txn
                    .user(user_id)
                    .map(|u| (u.owned_lobby, u.member_lobby))
                    .unwrap_or((None, None)))
            });
        hints.unwrap_or((None, None))
    }
}

fn lobby_view(txn: &Txn, lobby: &Lobby) -> Result<LobbyView, ApiError> {
    let owner = UserProfile::from(txn.user(&lobby.owner_id)?);
    let mut members = Vec::with_capacity(lobby.members.len());
    for member_id in &lobby.members {
        members.push(UserProfile::from(txn.user(member_id)?));
    }
    members.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(LobbyView {
        id: lobby.id,
        name: lobby.name.clone(),
        description: lobby.description.clone(),
        image_url: lobby.image_url.clone(),
        visibility: lobby.visibility,
        capacity: lobby.capacity,
        owner,
        members,
        created_at: lobby.created_at,
        updated_at: lobby.updated_at,
    })
}
