use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use duotris_core::protocol::{ErrorResponse, JoinRequest, JoinResponse, RankedResult};
use duotris_core::session::SessionSnapshot;

use crate::auth::Identity;
use crate::db;
use crate::manager::JoinError;
use crate::state::AppState;
use crate::ws;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Matchmaking ─────────────────────────────────────────────────────────

pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(passcode): Path<String>,
    Extension(Identity(user_id)): Extension<Identity>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let (session_id, is_new) = state
        .manager
        .join_by_passcode(&passcode, &user_id, request.deck_id.as_deref())
        .await
        .map_err(|err| {
            let status = match err {
                JoinError::InvalidPasscode => StatusCode::BAD_REQUEST,
                JoinError::NotJoinable | JoinError::RoomFull | JoinError::OwnRoom => {
                    StatusCode::CONFLICT
                }
            };
            api_error(status, err.to_string())
        })?;

    let message = if is_new {
        "Room created, waiting for an opponent"
    } else {
        "Joined the room"
    };
    Ok(Json(JoinResponse {
        session_id,
        is_new,
        message: message.to_string(),
    }))
}

pub async fn room_status(
    State(state): State<Arc<AppState>>,
    Path(passcode): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .manager
        .session_snapshot(&passcode)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "room not found"))
}

pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(passcode): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.manager.delete_session(&passcode).await {
        Ok(Json(serde_json::json!({ "message": "session deleted" })))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "room not found"))
    }
}

// ── Results ─────────────────────────────────────────────────────────────

pub async fn top_results(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RankedResult>>, ApiError> {
    db::top_results(&state.db, 100)
        .await
        .map(Json)
        .map_err(|err| {
            tracing::error!(%err, "failed to load ranking");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load ranking")
        })
}

pub async fn user_result(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<RankedResult>, ApiError> {
    db::user_best(&state.db, &user_id)
        .await
        .map_err(|err| {
            tracing::error!(%err, "failed to load user result");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load result")
        })?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no result for this user"))
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Path(passcode): Path<String>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| ws::handle_socket(state, socket, passcode))
}
