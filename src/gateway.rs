use std::collections::{HashMap, HashSet};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{ClientRequest, ResponseStatus, ServerEvent};
use crate::lobby::LobbyId;
use crate::registry::{RoomKey, Session};
use crate::AppState;
use lobby_auth_common::{decode_jwt, Claims};

/// Handshake for the event stream. The credential comes from the `token`
/// query parameter, falling back to the `Authorization` header; without a
/// valid one the upgrade is refused and no session is ever registered.
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let token = params.get("token").cloned().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(String::from)
    });

    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Missing token").into_response();
    };

    let claims = match decode_jwt(&token, &state.secret) {
        Ok(claims) => claims,
        Err(e) => {
            // Verifier detail stays in the log; the client only sees the
            // generic message.
            warn!("rejecting socket handshake: {e}");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(state, claims, socket))
}

async fn handle_socket(state: AppState, claims: Claims, socket: WebSocket) {
    let user_id = claims.sub;
    // Prefer the token's cached hints; a token minted before any affiliation
    // carries none, so fall back to the store's current view.
    let (owned_lobby, member_lobby) = match (claims.owned_lobby_id, claims.member_lobby_id) {
        (None, None) => state.coordinator.lobby_hints(&user_id),
        hints => hints,
    };

    let mut rooms: HashSet<RoomKey> = HashSet::new();
    rooms.insert(RoomKey::User(user_id));
    rooms.extend(owned_lobby.map(RoomKey::Lobby));
    rooms.extend(member_lobby.map(RoomKey::Lobby));

    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.registry.register(Session {
        connection_id,
        user_id,
        rooms,
        sender: tx.clone(),
    });
    info!(user_id = %user_id, username = %claims.username, "session connected");

    let (mut sink, mut stream) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(user_id = %user_id, "socket error: {e}");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let request = match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(user_id = %user_id, "malformed client message: {e}");
                        send_event(&tx, &ServerEvent::exception("Invalid message payload"));
                        continue;
                    }
                };
                dispatch(&state, user_id, owned_lobby, request, &tx);
            }
            Message::Close(_) => {
                info!(user_id = %user_id, "connection closed by client");
                break;
            }
            _ => {}
        }
    }

    state.registry.unregister(&user_id, &connection_id);
    info!(user_id = %user_id, "session disconnected");
    drop(tx);
    let _ = forward.await;
}

/// Routes a validated client message to the coordinator. The actor is always
/// the session's own identity; the cached owned-lobby check is a fast local
/// gate in front of the coordinator's authoritative ownership check.
fn dispatch(
    state: &AppState,
    user_id: Uuid,
    owned_lobby: Option<LobbyId>,
    request: ClientRequest,
    tx: &UnboundedSender<Message>,
) {
    let target_lobby = match &request {
        ClientRequest::JoinRequest { lobby_id }
        | ClientRequest::RequestResponse { lobby_id, .. }
        | ClientRequest::RejectRequest { lobby_id, .. } => *lobby_id,
    };
    if owned_lobby != Some(target_lobby) {
        send_event(
            tx,
            &ServerEvent::exception("Only the lobby owner may perform this action"),
        );
        return;
    }

    let result = match request {
        ClientRequest::JoinRequest { lobby_id } => {
            match state.coordinator.pending_requests(lobby_id, user_id) {
                Ok(pending) => {
                    for entry in pending {
                        send_event(
                            tx,
                            &ServerEvent::JoinRequest {
                                user_id: entry.user_id,
                                username: entry.username,
                                timestamp: entry.requested_at,
                            },
                        );
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        ClientRequest::RequestResponse {
            lobby_id,
            user_id: target,
            status,
        } => match status {
            ResponseStatus::Accepted => {
                state.coordinator.approve_join_request(lobby_id, target, user_id)
            }
            ResponseStatus::Rejected => {
                state.coordinator.reject_join_request(lobby_id, target, user_id)
            }
        },
        ClientRequest::RejectRequest {
            lobby_id,
            user_id: target,
            ..
        } => state.coordinator.reject_join_request(lobby_id, target, user_id),
    };

    if let Err(e) = result {
        // Domain error messages are safe to forward; anything unexpected has
        // already been collapsed to the generic retry message.
        send_event(tx, &ServerEvent::exception(e.to_string()));
    }
}

fn send_event(tx: &UnboundedSender<Message>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text));
        }
        Err(e) => warn!("failed to serialize event: {e}"),
    }
}
