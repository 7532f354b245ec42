use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lobby::{LobbyId, RequestStatus, UserId, Visibility};

/// Advisory re-request cooldown sent with rejections. Client UI metadata,
/// not enforced server-side.
pub const REJECTION_COOLDOWN: &str = "6h";

/// Server-to-client events, pushed through room subscriptions as
/// `{"event": "...", "data": {...}}` JSON frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    JoinRequest {
        user_id: UserId,
        username: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RequestCancelled {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RequestUpdated {
        lobby_id: LobbyId,
        status: RequestStatus,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cooldown: Option<&'static str>,
    },
    #[serde(rename_all = "camelCase")]
    MemberJoined {
        user_id: UserId,
        username: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MemberLeft {
        user_id: UserId,
        username: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    VisibilityChanged {
        visibility: Visibility,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Exception {
        status: &'static str,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    pub fn request_updated(lobby_id: LobbyId, status: RequestStatus) -> Self {
        ServerEvent::RequestUpdated {
            lobby_id,
            status,
            timestamp: Utc::now(),
            cooldown: (status == RequestStatus::Rejected).then_some(REJECTION_COOLDOWN),
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        ServerEvent::Exception {
            status: "error",
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Client-to-server socket messages, validated by shape before dispatch.
/// The acting user is always taken from the session identity; payloads only
/// name the *target* lobby/user.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    JoinRequest { lobby_id: LobbyId },
    #[serde(rename_all = "camelCase")]
    RequestResponse {
        lobby_id: LobbyId,
        user_id: UserId,
        status: ResponseStatus,
    },
    #[serde(rename_all = "camelCase")]
    RejectRequest {
        lobby_id: LobbyId,
        user_id: UserId,
        status: ResponseStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accepted,
    Rejected,
}
