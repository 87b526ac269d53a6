use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use tracing::{info, warn};

use duotris_core::protocol::{ErrorFrame, HandshakeFrame, HandshakeReply};

use crate::auth::{self, BYPASS_TOKEN, TEST_IDENTITY};
use crate::state::AppState;

/// How long a fresh connection gets to present its auth frame.
const AUTH_DEADLINE: Duration = Duration::from_secs(10);

/// Runs the one-shot auth handshake and hands the socket to the session
/// manager. Spawned per upgraded connection.
pub async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket, passcode: String) {
    let user_id = match authenticate(&state, &mut socket).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            let _ = send_error(&mut socket, &reason).await;
            return;
        }
    };

    if let Err(err) = state.manager.validate_membership(&passcode, &user_id) {
        warn!(%user_id, passcode, %err, "refusing connection");
        let _ = send_error(&mut socket, &err.to_string()).await;
        return;
    }

    let reply = HandshakeReply::AuthSuccess {
        message: "Authentication successful".to_string(),
    };
    if let Ok(frame) = serde_json::to_string(&reply) {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    info!(%user_id, passcode, "websocket authenticated");

    if let Err(err) = state
        .manager
        .register(passcode.clone(), user_id.clone(), socket)
        .await
    {
        // The socket has moved into the manager's pumps by now; all we can
        // do is log why registration was refused.
        warn!(%user_id, passcode, %err, "registration rejected");
    }
}

/// Waits for the single `{"type":"auth","token":...}` frame and resolves
/// the participant identity. The literal bypass token yields the
/// deterministic test identity.
async fn authenticate(state: &AppState, socket: &mut WebSocket) -> Result<String, String> {
    let text = tokio::time::timeout(AUTH_DEADLINE, recv_text(socket))
        .await
        .map_err(|_| "Timed out waiting for auth message".to_string())?
        .ok_or_else(|| "Connection closed before auth".to_string())?;

    let frame: HandshakeFrame =
        serde_json::from_str(&text).map_err(|_| "Expected auth message".to_string())?;
    let HandshakeFrame::Auth { token } = frame;

    if token == BYPASS_TOKEN {
        return Ok(TEST_IDENTITY.to_string());
    }

    auth::validate_token(&token, state.config.jwt_secret.as_deref())
        .map_err(|err| err.to_string())
}

async fn recv_text(socket: &mut WebSocket) -> Option<String> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

async fn send_error(socket: &mut WebSocket, reason: &str) -> Result<(), axum::Error> {
    let frame = serde_json::to_string(&ErrorFrame {
        error: reason.to_string(),
    })
    .unwrap_or_default();
    socket.send(Message::Text(frame.into())).await
}
