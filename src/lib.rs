pub mod args;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lobby;
pub mod notify;
pub mod registry;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use crate::coordinator::{CreateLobbySpec, LobbyCoordinator};
use crate::error::ApiError;
use crate::lobby::{LobbyView, PendingRequestView, Visibility};
use crate::notify::Notifier;
use crate::registry::ConnectionRegistry;
use crate::store::MembershipStore;

pub use lobby_auth_common::{issue_jwt, AuthSecret, Claims};

pub fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lobby_server=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(false)
                .with_target(false),
        )
        .init();
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: LobbyCoordinator,
    pub registry: ConnectionRegistry,
    pub secret: AuthSecret,
}

impl FromRef<AppState> for AuthSecret {
    fn from_ref(input: &AppState) -> Self {
        input.secret.clone()
    }
}

pub fn build_state(secret: AuthSecret) -> AppState {
    let registry = ConnectionRegistry::new();
    let coordinator = LobbyCoordinator::new(
        Arc::new(MembershipStore::new()),
        Notifier::new(registry.clone()),
    );
    AppState {
        coordinator,
        registry,
        secret,
    }
}

pub async fn run(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string());
    let state = build_state(AuthSecret(secret));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/ws", get(gateway::ws_handler))
        .route("/lobbies", post(create_lobby_handler))
        .route("/lobbies/me", get(my_lobby_handler))
        .route("/lobbies/leave", post(leave_lobby_handler))
        .route("/lobbies/:lobby_id", get(get_lobby_handler))
        .route("/lobbies/:lobby_id/visibility", patch(update_visibility_handler))
        .route(
            "/lobbies/:lobby_id/requests",
            post(create_request_handler)
                .get(list_requests_handler)
                .delete(cancel_request_handler),
        )
        .route(
            "/lobbies/:lobby_id/requests/:user_id/approve",
            post(approve_request_handler),
        )
        .route(
            "/lobbies/:lobby_id/requests/:user_id/reject",
            post(reject_request_handler),
        )
        .route(
            "/lobbies/:lobby_id/members/:user_id",
            delete(remove_member_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
}

async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.coordinator.find_or_create_user(&payload.username)?;
    let token = issue_jwt(
        user.id,
        user.username.clone(),
        user.owned_lobby,
        user.member_lobby,
        &state.secret,
    )
    .map_err(|e| {
        error!("failed to issue token: {e}");
        ApiError::Internal
    })?;
    Ok(Json(json!({ "token": token, "userId": user.id })))
}

async fn create_lobby_handler(
    State(state): State<AppState>,
    claims: Claims,
    Json(payload): Json<CreateLobbySpec>,
) -> Result<Json<LobbyView>, ApiError> {
    let view = state.coordinator.create_lobby(payload, claims.sub)?;
    Ok(Json(view))
}

async fn my_lobby_handler(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<LobbyView>, ApiError> {
    Ok(Json(state.coordinator.get_my_lobby(claims.sub)?))
}

async fn get_lobby_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<Uuid>,
    claims: Claims,
) -> Result<Json<LobbyView>, ApiError> {
    Ok(Json(state.coordinator.get_lobby(lobby_id, claims.sub)?))
}

#[derive(Deserialize)]
pub struct UpdateVisibilityRequest {
    visibility: Visibility,
}

async fn update_visibility_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<Uuid>,
    claims: Claims,
    Json(payload): Json<UpdateVisibilityRequest>,
) -> Result<Json<LobbyView>, ApiError> {
    let view = state
        .coordinator
        .update_visibility(lobby_id, claims.sub, payload.visibility)?;
    Ok(Json(view))
}

async fn create_request_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<Uuid>,
    claims: Claims,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.create_join_request(lobby_id, claims.sub)?;
    Ok(StatusCode::CREATED)
}

async fn list_requests_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<Uuid>,
    claims: Claims,
) -> Result<Json<Vec<PendingRequestView>>, ApiError> {
    Ok(Json(state.coordinator.pending_requests(lobby_id, claims.sub)?))
}

async fn cancel_request_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<Uuid>,
    claims: Claims,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.cancel_join_request(lobby_id, claims.sub)?;
    Ok(StatusCode::OK)
}

async fn approve_request_handler(
    State(state): State<AppState>,
    Path((lobby_id, user_id)): Path<(Uuid, Uuid)>,
    claims: Claims,
) -> Result<impl IntoResponse, ApiError> {
    state
        .coordinator
        .approve_join_request(lobby_id, user_id, claims.sub)?;
    Ok(StatusCode::OK)
}

async fn reject_request_handler(
    State(state): State<AppState>,
    Path((lobby_id, user_id)): Path<(Uuid, Uuid)>,
    claims: Claims,
) -> Result<impl IntoResponse, ApiError> {
    state
        .coordinator
        .reject_join_request(lobby_id, user_id, claims.sub)?;
    Ok(StatusCode::OK)
}

async fn remove_member_handler(
    State(state): State<AppState>,
    Path((lobby_id, user_id)): Path<(Uuid, Uuid)>,
    claims: Claims,
) -> Result<impl IntoResponse, ApiError> {
    state
        .coordinator
        .remove_member(lobby_id, user_id, claims.sub)?;
    Ok(StatusCode::OK)
}

async fn leave_lobby_handler(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.leave_lobby(claims.sub)?;
    Ok(StatusCode::OK)
}
