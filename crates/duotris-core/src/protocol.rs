use serde::{Deserialize, Serialize};

use crate::rules::Action;

/// First (and only) control frame a client sends after the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeFrame {
    Auth { token: String },
}

/// Server replies on the handshake path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeReply {
    AuthSuccess { message: String },
}

/// Error frame used on both the handshake and steady-state paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

/// A steady-state input frame. The `user_id` the client sends is ignored
/// and overwritten with the authenticated identity before routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFrame {
    #[serde(default)]
    pub user_id: String,
    pub action: Action,
}

/// Body of the join-by-passphrase request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub deck_id: Option<String>,
}

/// Response to a successful join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub session_id: String,
    pub is_new: bool,
    pub message: String,
}

/// Machine-parseable error body for the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One row of the score ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub id: i64,
    pub user_id: String,
    pub score: i64,
    pub rank: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_parses_wire_form() {
        let frame: HandshakeFrame =
            serde_json::from_str(r#"{"type":"auth","token":"abc"}"#).unwrap();
        let HandshakeFrame::Auth { token } = frame;
        assert_eq!(token, "abc");
    }

    #[test]
    fn auth_success_has_type_tag() {
        let reply = HandshakeReply::AuthSuccess {
            message: "Authentication successful".into(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "auth_success");
    }

    #[test]
    fn input_frame_defaults_missing_user_id() {
        let frame: InputFrame = serde_json::from_str(r#"{"action":"hard_drop"}"#).unwrap();
        assert_eq!(frame.user_id, "");
        assert_eq!(frame.action, Action::HardDrop);
    }

    #[test]
    fn input_frame_rejects_unknown_action() {
        assert!(serde_json::from_str::<InputFrame>(r#"{"action":"fly"}"#).is_err());
    }
}
