use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type UserId = Uuid;
pub type LobbyId = Uuid;

pub const DEFAULT_CAPACITY: u32 = 30;

/// Stable permission tier. Ownership of a lobby is derived from the user's
/// owned-lobby reference, not stored in this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Member,
    Admin,
}

/// Wire-level role. `Owner` is computed, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub tier: Tier,
    pub owned_lobby: Option<LobbyId>,
    pub member_lobby: Option<LobbyId>,
}

impl User {
    pub fn new(username: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            tier: Tier::Member,
            owned_lobby: None,
            member_lobby: None,
        }
    }

    pub fn role(&self) -> Role {
        if self.owned_lobby.is_some() {
            Role::Owner
        } else {
            match self.tier {
                Tier::Member => Role::Member,
                Tier::Admin => Role::Admin,
            }
        }
    }

    /// True if the user owns or belongs to any lobby. An owner is always a
    /// member of their own lobby, so checking both covers every case.
    pub fn is_affiliated(&self) -> bool {
        self.owned_lobby.is_some() || self.member_lobby.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Lobby {
    pub id: LobbyId,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub visibility: Visibility,
    pub capacity: u32,
    pub owner_id: UserId,
    pub members: HashSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lobby {
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() as u32 >= self.capacity
    }
}

/// A pending request to join a lobby. Approval, rejection and cancellation
/// all delete the record; there is no stored status field.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub user_id: UserId,
    pub lobby_id: LobbyId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Accepted,
    Rejected,
    Kicked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub id: LobbyId,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub visibility: Visibility,
    pub capacity: u32,
    pub owner: UserProfile,
    pub members: Vec<UserProfile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequestView {
    pub user_id: UserId,
    pub username: String,
    pub requested_at: DateTime<Utc>,
}
