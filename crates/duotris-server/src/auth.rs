use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use duotris_core::protocol::ErrorResponse;

use crate::state::AppState;

/// Literal token the duplex handshake accepts as a deterministic test login.
pub const BYPASS_TOKEN: &str = "BYPASS_AUTH";
pub const TEST_IDENTITY: &str = "test-user-123";

/// The authenticated participant id, stored as a request extension.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,

    #[error("Invalid Authorization header format. Must be 'Bearer <token>'")]
    MalformedHeader,

    #[error("Server configuration error: JWT secret missing")]
    MissingSecret,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token: missing user ID")]
    MissingSubject,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Validates a signed bearer and maps its subject claim to a participant
/// id. An optional `Bearer ` prefix is tolerated so the same validator
/// serves headers and in-band handshake tokens.
pub fn validate_token(token: &str, secret: Option<&str>) -> Result<String, AuthError> {
    let secret = secret.ok_or(AuthError::MissingSecret)?;
    let token = token.strip_prefix("Bearer ").unwrap_or(token);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|err| {
        tracing::warn!(%err, "bearer validation failed");
        AuthError::InvalidToken
    })?;

    if data.claims.sub.is_empty() {
        return Err(AuthError::MissingSubject);
    }
    Ok(data.claims.sub)
}

/// Middleware guarding the REST surface: resolves the caller's identity and
/// stashes it in the request extensions. `BYPASS_AUTH=true` mints a fresh
/// test identity per request instead.
pub async fn require_identity(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let identity = if state.config.bypass_auth {
        let minted = uuid::Uuid::new_v4().to_string();
        tracing::debug!(user_id = %minted, "auth bypass enabled, minted test identity");
        Identity(minted)
    } else {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| reject(AuthError::MissingHeader))?;
        if !header.starts_with("Bearer ") {
            return Err(reject(AuthError::MalformedHeader));
        }
        let user_id = validate_token(header, state.config.jwt_secret.as_deref())
            .map_err(reject)?;
        Identity(user_id)
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

fn reject(err: AuthError) -> (StatusCode, Json<ErrorResponse>) {
    (
        err.status(),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
