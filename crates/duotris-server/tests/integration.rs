use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use duotris_server::config::Config;

const JWT_SECRET: &str = "integration-test-secret";

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Spin up a test server on a random port, return the base URL.
async fn start_server() -> String {
    // A per-test sqlite file so tests don't clash.
    let db_path = std::env::temp_dir().join(format!(
        "duotris-test-{}-{}.db",
        std::process::id(),
        DB_COUNTER.fetch_add(1, Ordering::Relaxed),
    ));
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: format!("sqlite:{}?mode=rwc", db_path.display()),
        jwt_secret: Some(JWT_SECRET.to_string()),
        bypass_auth: false,
        allow_parallel_connections: false,
    };
    let (app, _state) = duotris_server::build_app(config).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{}", port)
}

#[derive(serde::Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Mint a signed bearer for the given participant id.
fn bearer(sub: &str) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            sub: sub.to_string(),
            exp: 4102444800, // far future
        },
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// POST a join request, returning (status, body).
async fn join(base: &str, passcode: &str, user: &str) -> (u16, serde_json::Value) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/game/room/passcode/{}/join", base, passcode))
        .bearer_auth(bearer(user))
        .json(&json!({ "deck_id": null }))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn room_status(base: &str, passcode: &str, user: &str) -> (u16, serde_json::Value) {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/game/room/passcode/{}/status", base, passcode))
        .bearer_auth(bearer(user))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Connect a WebSocket client, run the auth handshake, return the split
/// stream once auth_success has arrived.
async fn ws_connect(base: &str, passcode: &str, user: &str) -> (WsSink, WsStream) {
    let ws_url = base.replace("http://", "ws://");
    let url = format!("{}/api/game/ws/{}", ws_url, passcode);
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut sink, mut stream) = stream.split();

    sink.send(Message::Text(
        json!({ "type": "auth", "token": bearer(user) }).to_string().into(),
    ))
    .await
    .unwrap();

    let reply = ws_recv_json(&mut stream, |v| v["type"].as_str() == Some("auth_success")).await;
    assert_eq!(reply["type"].as_str().unwrap(), "auth_success");

    (sink, stream)
}

/// Receive frames until one matches the predicate. Panics after 10 s.
async fn ws_recv_json(
    stream: &mut WsStream,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline - tokio::time::Instant::now();
        if remaining.is_zero() {
            panic!("Timed out waiting for a matching frame");
        }
        let msg = tokio::time::timeout(remaining, stream.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();

        if let Message::Text(text) = msg {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            if pred(&parsed) {
                return parsed;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let base = start_server().await;
    let resp = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(resp, "ok");
}

#[tokio::test]
async fn test_join_requires_identity() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/game/room/passcode/hello/join", base))
        .json(&json!({ "deck_id": null }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn test_passphrase_matchmaking() {
    let base = start_server().await;

    let (status, body) = join(&base, "hello", "alice").await;
    assert_eq!(status, 200);
    assert_eq!(body["session_id"], "hello");
    assert_eq!(body["is_new"], true);

    let (status, body) = join(&base, "hello", "bob").await;
    assert_eq!(status, 200);
    assert_eq!(body["is_new"], false);

    // The creator cannot join their own room.
    let (status, body) = join(&base, "hello", "alice").await;
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("own room"));

    // A third player finds it full.
    let (status, body) = join(&base, "hello", "carol").await;
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("full"));
}

#[tokio::test]
async fn test_invalid_passphrase_rejected() {
    let base = start_server().await;
    let (status, body) = join(&base, "ab", "alice").await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("3 to 20"));
}

#[tokio::test]
async fn test_room_status_lifecycle() {
    let base = start_server().await;

    let (status, _) = room_status(&base, "nosuch", "alice").await;
    assert_eq!(status, 404);

    join(&base, "status1", "alice").await;
    let (status, body) = room_status(&base, "status1", "alice").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "waiting");
    assert_eq!(body["player1"]["user_id"], "alice");
    assert!(body["player2"].is_null());
    assert_eq!(body["time_limit"], 100);
}

#[tokio::test]
async fn test_ws_rejects_invalid_token() {
    let base = start_server().await;
    join(&base, "wsauth", "alice").await;

    let ws_url = base.replace("http://", "ws://");
    let (stream, _) = tokio_tungstenite::connect_async(format!("{}/api/game/ws/wsauth", ws_url))
        .await
        .unwrap();
    let (mut sink, mut stream) = stream.split();
    sink.send(Message::Text(
        json!({ "type": "auth", "token": "garbage" }).to_string().into(),
    ))
    .await
    .unwrap();

    let reply = ws_recv_json(&mut stream, |v| v.get("error").is_some()).await;
    assert_eq!(reply["error"], "Invalid token");
}

#[tokio::test]
async fn test_match_starts_when_both_players_connect() {
    let base = start_server().await;
    join(&base, "xyz123", "alice").await;
    join(&base, "xyz123", "bob").await;

    let (_alice_sink, mut alice_stream) = ws_connect(&base, "xyz123", "alice").await;

    // Only one connection: the room keeps waiting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (_, body) = room_status(&base, "xyz123", "alice").await;
    assert_eq!(body["status"], "waiting");

    let (_bob_sink, mut bob_stream) = ws_connect(&base, "xyz123", "bob").await;

    // Both clients get a playing snapshot with the start time stamped.
    let snap = ws_recv_json(&mut alice_stream, |v| v["status"] == "playing").await;
    assert!(snap["started_at"].as_u64().is_some());
    assert_eq!(snap["player1"]["user_id"], "alice");
    assert_eq!(snap["player2"]["user_id"], "bob");
    let _ = ws_recv_json(&mut bob_stream, |v| v["status"] == "playing").await;

    let (_, body) = room_status(&base, "xyz123", "alice").await;
    assert_eq!(body["status"], "playing");
    assert!(body["remaining_time"].as_u64().unwrap() <= 100);
}

#[tokio::test]
async fn test_input_yields_immediate_snapshot_for_actor() {
    let base = start_server().await;
    join(&base, "drop1", "alice").await;
    join(&base, "drop1", "bob").await;
    let (mut alice_sink, mut alice_stream) = ws_connect(&base, "drop1", "alice").await;
    let (_bob_sink, mut bob_stream) = ws_connect(&base, "drop1", "bob").await;
    let _ = ws_recv_json(&mut alice_stream, |v| v["status"] == "playing").await;
    let _ = ws_recv_json(&mut bob_stream, |v| v["status"] == "playing").await;

    // The frame's user_id is ignored by the server.
    alice_sink
        .send(Message::Text(
            json!({ "user_id": "spoofed", "action": "hard_drop" }).to_string().into(),
        ))
        .await
        .unwrap();

    // A hard drop always banks at least the drop bonus for the actor.
    let snap = ws_recv_json(&mut alice_stream, |v| {
        v["player1"]["score"].as_u64().unwrap_or(0) > 0
    })
    .await;
    assert!(snap["player1"]["lines_cleared"].as_u64().is_some());
    assert_eq!(snap["player2"]["score"], 0);
}

#[tokio::test]
async fn test_snapshot_carries_score_maps_and_pieces() {
    let base = start_server().await;
    join(&base, "wire1", "alice").await;
    join(&base, "wire1", "bob").await;
    let (_a_sink, mut alice_stream) = ws_connect(&base, "wire1", "alice").await;
    let (_b_sink, mut bob_stream) = ws_connect(&base, "wire1", "bob").await;
    let snap = ws_recv_json(&mut alice_stream, |v| v["status"] == "playing").await;
    let _ = ws_recv_json(&mut bob_stream, |v| v["status"] == "playing").await;

    let p1 = &snap["player1"];
    // 10x20 board of numeric cells.
    assert_eq!(p1["board"].as_array().unwrap().len(), 20);
    assert_eq!(p1["board"][0].as_array().unwrap().len(), 10);
    // A live piece pipeline with visible spawn position.
    assert!(p1["current_piece"]["type"].is_string());
    assert_eq!(p1["current_piece"]["rotation"], 0);
    assert!(p1["next_piece"].is_object());
    // Random scoring covers the whole board; the falling piece has its own map.
    assert_eq!(p1["cell_scores"].as_object().unwrap().len(), 200);
    assert_eq!(p1["current_piece_scores"].as_object().unwrap().len(), 4);
    // Internals stay off the wire.
    assert!(p1.get("bag").is_none());
    assert!(p1["current_piece"].get("payload").is_none());
}

#[tokio::test]
async fn test_delete_session() {
    let base = start_server().await;
    join(&base, "gone", "alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{}/api/game/room/passcode/gone", base))
        .bearer_auth(bearer("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let (status, _) = room_status(&base, "gone", "alice").await;
    assert_eq!(status, 404);

    let resp = client
        .delete(format!("{}/api/game/room/passcode/gone", base))
        .bearer_auth(bearer("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn test_disconnect_ends_match_and_records_results() {
    let base = start_server().await;
    join(&base, "leaver", "alice").await;
    join(&base, "leaver", "bob").await;
    let (alice_sink, alice_stream) = ws_connect(&base, "leaver", "alice").await;
    let (_bob_sink, mut bob_stream) = ws_connect(&base, "leaver", "bob").await;
    let _ = ws_recv_json(&mut bob_stream, |v| v["status"] == "playing").await;

    // Alice walks away mid-match.
    drop(alice_sink);
    drop(alice_stream);

    // The session finishes and both final scores land in the ranking.
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let results: Vec<serde_json::Value> = client
            .get(format!("{}/api/results", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if results.len() == 2 {
            let users: Vec<&str> = results
                .iter()
                .map(|r| r["user_id"].as_str().unwrap())
                .collect();
            assert!(users.contains(&"alice"));
            assert!(users.contains(&"bob"));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "results never recorded"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let (status, _) = room_status(&base, "leaver", "alice").await;
    assert_eq!(status, 404);
}
