use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use duotris_core::deck::DeckPlacement;
use duotris_core::protocol::InputFrame;
use duotris_core::rules::{apply_input, auto_fall, Action};
use duotris_core::session::{GameSession, SessionSnapshot, SessionStatus};
use duotris_core::PlayerState;

use crate::db::{DeckSource, ResultSink};

/// Central loop cadence: auto-fall, time-limit checks, periodic fan-out.
pub const TICK_INTERVAL: Duration = Duration::from_millis(1000);
/// Minimum spacing between fan-outs for one room; requests inside the
/// window coalesce into the next one.
pub const BROADCAST_MIN_INTERVAL: Duration = Duration::from_millis(1000);
/// Final-state visibility delay once both players have topped out.
const GAME_OVER_GRACE: Duration = Duration::from_secs(2);
/// Registration-to-start-check delay, papering over the join/connect race.
const START_CHECK_DELAY: Duration = Duration::from_millis(50);

const EVENT_QUEUE_CAPACITY: usize = 512;
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

const READ_DEADLINE: Duration = Duration::from_secs(300);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(60);
const MAX_WRITE_FAILURES: u32 = 3;

const PASSCODE_MIN: usize = 3;
const PASSCODE_MAX: usize = 20;

/// Why a session ended; logged and broadcast with the final state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    TimeUp,
    BothToppedOut,
    Disconnect,
    Manual,
}

impl EndReason {
    fn describe(self) -> &'static str {
        match self {
            EndReason::TimeUp => "time limit reached",
            EndReason::BothToppedOut => "both players topped out",
            EndReason::Disconnect => "player disconnected",
            EndReason::Manual => "deleted by request",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("passphrase must be 3 to 20 characters")]
    InvalidPasscode,

    #[error("this room is already playing or finished")]
    NotJoinable,

    #[error("this room is already full")]
    RoomFull,

    #[error("cannot join your own room")]
    OwnRoom,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("room not found")]
    RoomNotFound,

    #[error("not a participant of this room")]
    NotParticipant,

    #[error("server is shutting down")]
    Closed,
}

/// Send half of one connection. Dropping the handle closes the outbound
/// queue, which makes the write pump close the socket.
#[derive(Debug)]
pub struct ClientHandle {
    pub user_id: String,
    pub room_id: String,
    pub generation: u64,
    tx: mpsc::Sender<String>,
}

impl ClientHandle {
    /// Non-blocking send: a full or closed queue drops the frame.
    fn try_send(&self, frame: String) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

enum ManagerEvent {
    Register(ClientHandle),
    Unregister { user_id: String, generation: u64 },
    Input { user_id: String, action: Action },
    StartCheck { room_id: String },
    Broadcast { room_id: String },
    Finalize { room_id: String, reason: EndReason },
}

/// Owns every room and connection in the process. One central loop applies
/// all game mutation; read pumps feed it events, write pumps drain the
/// per-connection queues.
pub struct SessionManager {
    sessions: DashMap<String, GameSession>,
    connections: DashMap<u64, ClientHandle>,
    events_tx: mpsc::Sender<ManagerEvent>,
    last_broadcast: Mutex<HashMap<String, Instant>>,
    next_generation: AtomicU64,
    shutdown: Notify,
    result_sink: Arc<dyn ResultSink>,
    deck_source: Arc<dyn DeckSource>,
    allow_parallel_connections: bool,
}

impl SessionManager {
    /// Builds the manager and starts its central loop.
    pub fn new(
        result_sink: Arc<dyn ResultSink>,
        deck_source: Arc<dyn DeckSource>,
        allow_parallel_connections: bool,
    ) -> Arc<Self> {
        let (manager, events_rx) =
            Self::with_queue(result_sink, deck_source, allow_parallel_connections);
        tokio::spawn(Arc::clone(&manager).run(events_rx));
        manager
    }

    /// Split constructor so tests can drive the event queue by hand.
    fn with_queue(
        result_sink: Arc<dyn ResultSink>,
        deck_source: Arc<dyn DeckSource>,
        allow_parallel_connections: bool,
    ) -> (Arc<Self>, mpsc::Receiver<ManagerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let manager = Arc::new(SessionManager {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            events_tx,
            last_broadcast: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            shutdown: Notify::new(),
            result_sink,
            deck_source,
            allow_parallel_connections,
        });
        (manager, events_rx)
    }

    /// The central loop: one task serializing every game mutation.
    async fn run(self: Arc<Self>, mut events_rx: mpsc::Receiver<ManagerEvent>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    self.close_all();
                    info!("session manager stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }
    }

    /// Signals the central loop to stop; it closes every connection and
    /// clears both registries on the way out.
    pub fn shutdown(&self) {
        // notify_one stores a permit, so the signal survives even if the
        // loop is mid-event rather than parked on notified().
        self.shutdown.notify_one();
    }

    fn close_all(&self) {
        let open = self.connections.len();
        self.connections.clear();
        self.sessions.clear();
        self.last_broadcast.lock().unwrap().clear();
        info!(closed = open, "closed all connections and sessions");
    }

    // ── Matchmaking ─────────────────────────────────────────────────────

    /// Joins (or creates) the room rendezvoused by `passcode`. Returns the
    /// session id and whether this call created the room.
    pub async fn join_by_passcode(
        &self,
        passcode: &str,
        player_id: &str,
        deck_id: Option<&str>,
    ) -> Result<(String, bool), JoinError> {
        if passcode.len() < PASSCODE_MIN || passcode.len() > PASSCODE_MAX {
            return Err(JoinError::InvalidPasscode);
        }

        let deck = self.load_deck(deck_id).await;

        match self.sessions.entry(passcode.to_string()) {
            dashmap::Entry::Vacant(slot) => {
                let player1 = PlayerState::with_deck(player_id, deck);
                slot.insert(GameSession::new(passcode, player1));
                info!(passcode, player_id, "created session");
                Ok((passcode.to_string(), true))
            }
            dashmap::Entry::Occupied(mut slot) => {
                let session = slot.get_mut();
                if session.status != SessionStatus::Waiting {
                    return Err(JoinError::NotJoinable);
                }
                if session.player2.is_some() {
                    return Err(JoinError::RoomFull);
                }
                if session.player1.user_id == player_id {
                    return Err(JoinError::OwnRoom);
                }
                session.set_player2(PlayerState::with_deck(player_id, deck));
                info!(passcode, player_id, "joined session as player2");
                Ok((passcode.to_string(), false))
            }
        }
    }

    async fn load_deck(&self, deck_id: Option<&str>) -> Vec<DeckPlacement> {
        let Some(deck_id) = deck_id else {
            return Vec::new();
        };
        match self.deck_source.placements(deck_id).await {
            Ok(placements) => placements,
            Err(err) => {
                warn!(deck_id, %err, "deck load failed, falling back to random scores");
                Vec::new()
            }
        }
    }

    /// Read-only projection for the status endpoint.
    pub fn session_snapshot(&self, passcode: &str) -> Option<SessionSnapshot> {
        self.sessions
            .get(passcode)
            .map(|session| session.snapshot(Instant::now()))
    }

    /// Finalizes a session on request. Returns false if it does not exist.
    pub async fn delete_session(&self, passcode: &str) -> bool {
        if !self.sessions.contains_key(passcode) {
            return false;
        }
        self.end_session(passcode, EndReason::Manual).await;
        true
    }

    pub fn user_connected(&self, user_id: &str) -> bool {
        self.connections.iter().any(|c| c.user_id == user_id)
    }

    /// Checks that `user_id` holds one of the room's two seats.
    pub fn validate_membership(&self, room_id: &str, user_id: &str) -> Result<(), RegisterError> {
        let session = self
            .sessions
            .get(room_id)
            .ok_or(RegisterError::RoomNotFound)?;
        if session.is_participant(user_id) {
            Ok(())
        } else {
            Err(RegisterError::NotParticipant)
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    /// Takes ownership of an authenticated socket: spawns its read and
    /// write pumps, enqueues registration, and schedules the start-check.
    pub async fn register(
        self: &Arc<Self>,
        room_id: String,
        user_id: String,
        socket: WebSocket,
    ) -> Result<(), RegisterError> {
        self.validate_membership(&room_id, &user_id)?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (sink, stream) = socket.split();

        tokio::spawn(write_pump(user_id.clone(), sink, rx));
        tokio::spawn(read_pump(
            Arc::clone(self),
            user_id.clone(),
            generation,
            stream,
        ));

        let handle = ClientHandle {
            user_id,
            room_id: room_id.clone(),
            generation,
            tx,
        };
        self.events_tx
            .send(ManagerEvent::Register(handle))
            .await
            .map_err(|_| RegisterError::Closed)?;

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(START_CHECK_DELAY).await;
            let _ = manager
                .events_tx
                .send(ManagerEvent::StartCheck { room_id })
                .await;
        });

        Ok(())
    }

    // ── Event handling (runs on the central loop) ───────────────────────

    async fn handle_event(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::Register(handle) => self.on_register(handle),
            ManagerEvent::Unregister {
                user_id,
                generation,
            } => self.on_unregister(user_id, generation).await,
            ManagerEvent::Input { user_id, action } => self.on_input(user_id, action),
            ManagerEvent::StartCheck { room_id } => self.on_start_check(&room_id),
            ManagerEvent::Broadcast { room_id } => self.fan_out(&room_id),
            ManagerEvent::Finalize { room_id, reason } => {
                self.end_session(&room_id, reason).await
            }
        }
    }

    fn on_register(&self, handle: ClientHandle) {
        if !self.allow_parallel_connections {
            let stale: Vec<u64> = self
                .connections
                .iter()
                .filter(|c| c.user_id == handle.user_id)
                .map(|c| c.generation)
                .collect();
            for generation in stale {
                self.connections.remove(&generation);
                info!(user_id = %handle.user_id, "replaced existing connection");
            }
        }

        let room_id = handle.room_id.clone();
        info!(user_id = %handle.user_id, room_id, "client registered");
        self.connections.insert(handle.generation, handle);
        self.request_broadcast(&room_id);
    }

    async fn on_unregister(&self, user_id: String, generation: u64) {
        let Some((_, handle)) = self.connections.remove(&generation) else {
            // A replaced connection unregistering after the fact.
            return;
        };
        let room_id = handle.room_id;
        info!(%user_id, room_id, "client unregistered");

        let status = self.sessions.get(&room_id).map(|s| s.status);
        match status {
            Some(SessionStatus::Playing) if !self.user_connected(&user_id) => {
                info!(%user_id, room_id, "player left mid-game, ending session");
                self.end_session(&room_id, EndReason::Disconnect).await;
            }
            Some(_) => self.request_broadcast(&room_id),
            None => {}
        }
    }

    fn on_input(&self, user_id: String, action: Action) {
        let Some(room_id) = self
            .connections
            .iter()
            .find(|c| c.user_id == user_id)
            .map(|c| c.room_id.clone())
        else {
            warn!(%user_id, "input from unregistered user");
            return;
        };

        let mut applied = false;
        let mut induced_game_over = false;
        if let Some(mut session) = self.sessions.get_mut(&room_id) {
            if session.status != SessionStatus::Playing {
                debug!(room_id, "ignoring input for a session that is not playing");
            } else if let Some(player) = session.player_mut(&user_id) {
                if player.game_over {
                    debug!(%user_id, "ignoring input from a topped-out player");
                } else {
                    applied = apply_input(player, action, Instant::now());
                    induced_game_over = applied && player.game_over;
                }
            } else {
                warn!(%user_id, room_id, "input from a non-participant");
            }
        }

        if applied {
            // The actor sees their own input immediately; the partner gets
            // the change on the next periodic broadcast.
            if let Some(frame) = self.snapshot_json(&room_id) {
                self.send_to_user(&user_id, &frame);
            }
            if induced_game_over {
                info!(%user_id, room_id, "player topped out, match continues");
                // A top-out must reach the partner immediately, even inside
                // the throttle window.
                self.fan_out_now(&room_id);
            }
        }
    }

    fn on_start_check(&self, room_id: &str) {
        let mut started = false;
        if let Some(mut session) = self.sessions.get_mut(room_id) {
            let both_present = session.player2.is_some();
            let both_connected = self.user_connected(&session.player1.user_id)
                && session
                    .player2
                    .as_ref()
                    .is_some_and(|p| self.user_connected(&p.user_id));
            if session.status == SessionStatus::Waiting && both_present && both_connected {
                session.start(Instant::now());
                started = true;
            }
        }
        if started {
            info!(room_id, "both players connected, match started");
            self.fan_out_now(room_id);
        }
    }

    async fn tick(&self) {
        let now = Instant::now();
        let playing: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Playing)
            .map(|s| s.id.clone())
            .collect();

        for room_id in playing {
            let mut timed_out = false;
            let mut grace = false;
            if let Some(mut session) = self.sessions.get_mut(&room_id) {
                if session.is_time_up(now) {
                    timed_out = true;
                } else {
                    if !session.player1.game_over {
                        auto_fall(&mut session.player1, now);
                    }
                    if let Some(player2) = session.player2.as_mut() {
                        if !player2.game_over {
                            auto_fall(player2, now);
                        }
                    }
                    grace = session.both_game_over();
                }
            }

            if timed_out {
                self.end_session(&room_id, EndReason::TimeUp).await;
                continue;
            }

            self.request_broadcast(&room_id);

            if grace {
                let events_tx = self.events_tx.clone();
                let room_id = room_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(GAME_OVER_GRACE).await;
                    let _ = events_tx
                        .send(ManagerEvent::Finalize {
                            room_id,
                            reason: EndReason::BothToppedOut,
                        })
                        .await;
                });
            }
        }
    }

    // ── Finalization ────────────────────────────────────────────────────

    /// Ends a session: stamps it finished, persists scores best-effort,
    /// sends the final state, then tears down its connections. Idempotent.
    async fn end_session(&self, room_id: &str, reason: EndReason) {
        let outcome = {
            let Some(mut session) = self.sessions.get_mut(room_id) else {
                return;
            };
            if session.status == SessionStatus::Finished {
                return;
            }
            session.finish();

            let mut scores = vec![(
                session.player1.user_id.clone(),
                session.player1.score as i64,
            )];
            if let Some(player2) = &session.player2 {
                scores.push((player2.user_id.clone(), player2.score as i64));
            }
            let frame = serde_json::to_string(&session.snapshot(Instant::now())).ok();
            (scores, frame)
        };
        let (scores, final_frame) = outcome;

        info!(room_id, reason = reason.describe(), "session ended");

        for (user_id, score) in &scores {
            match self.result_sink.record(user_id, *score).await {
                Ok(id) => debug!(%user_id, score, result_id = id, "recorded final score"),
                Err(err) => warn!(%user_id, %err, "failed to record final score"),
            }
        }

        // Final fan-out happens outside any registry lock.
        if let Some(frame) = final_frame {
            self.fan_out_frame(room_id, &frame);
        }

        let members: Vec<u64> = self
            .connections
            .iter()
            .filter(|c| c.room_id == room_id)
            .map(|c| c.generation)
            .collect();
        for generation in members {
            self.connections.remove(&generation);
        }

        self.sessions.remove(room_id);
        self.last_broadcast.lock().unwrap().remove(room_id);
    }

    // ── Fan-out ─────────────────────────────────────────────────────────

    /// Throttled broadcast request; coalesces inside the per-room window.
    fn request_broadcast(&self, room_id: &str) {
        {
            let mut last = self.last_broadcast.lock().unwrap();
            let now = Instant::now();
            if let Some(previous) = last.get(room_id) {
                if now.duration_since(*previous) < BROADCAST_MIN_INTERVAL {
                    return;
                }
            }
            last.insert(room_id.to_string(), now);
        }

        let event = ManagerEvent::Broadcast {
            room_id: room_id.to_string(),
        };
        if self.events_tx.try_send(event).is_err() {
            warn!(room_id, "broadcast queue full, dropping request");
        }
    }

    /// Immediate, unthrottled fan-out for the transitions clients must see
    /// right away: match start, a player topping out, and finish.
    fn fan_out_now(&self, room_id: &str) {
        self.last_broadcast
            .lock()
            .unwrap()
            .insert(room_id.to_string(), Instant::now());
        self.fan_out(room_id);
    }

    fn fan_out(&self, room_id: &str) {
        let Some(frame) = self.snapshot_json(room_id) else {
            debug!(room_id, "broadcast for a room that no longer exists");
            return;
        };
        self.fan_out_frame(room_id, &frame);
    }

    fn fan_out_frame(&self, room_id: &str, frame: &str) {
        for connection in self.connections.iter().filter(|c| c.room_id == room_id) {
            if !connection.try_send(frame.to_string()) {
                warn!(user_id = %connection.user_id, "outbound queue full or closed, dropping frame");
            }
        }
    }

    fn send_to_user(&self, user_id: &str, frame: &str) {
        for connection in self.connections.iter().filter(|c| c.user_id == user_id) {
            if !connection.try_send(frame.to_string()) {
                warn!(%user_id, "outbound queue full or closed, dropping frame");
            }
        }
    }

    fn snapshot_json(&self, room_id: &str) -> Option<String> {
        let session = self.sessions.get(room_id)?;
        match serde_json::to_string(&session.snapshot(Instant::now())) {
            Ok(json) => Some(json),
            Err(err) => {
                warn!(room_id, %err, "failed to serialize snapshot");
                None
            }
        }
    }
}

// ── Per-connection pumps ────────────────────────────────────────────────

/// Reads frames until error, close, or deadline; parses them into input
/// events. Always enqueues the unregister on the way out.
async fn read_pump(
    manager: Arc<SessionManager>,
    user_id: String,
    generation: u64,
    mut stream: SplitStream<WebSocket>,
) {
    loop {
        match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                warn!(%user_id, "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(%user_id, %err, "read error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<InputFrame>(&text) {
                    Ok(input) => {
                        // The frame's own user_id is untrusted and ignored.
                        let event = ManagerEvent::Input {
                            user_id: user_id.clone(),
                            action: input.action,
                        };
                        if manager.events_tx.try_send(event).is_err() {
                            warn!(%user_id, "input queue full, dropping frame");
                        }
                    }
                    Err(err) => warn!(%user_id, %err, "invalid input frame"),
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            // Pongs (and any other control frame) just refresh the deadline
            // by looping.
            Ok(Some(Ok(_))) => continue,
        }
    }

    let _ = manager
        .events_tx
        .send(ManagerEvent::Unregister {
            user_id,
            generation,
        })
        .await;
}

/// Drains the outbound queue onto the socket and keeps the connection
/// alive with periodic pings. Exits when the queue closes or writes keep
/// failing.
async fn write_pump(
    user_id: String,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );
    let mut failures = 0u32;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    // Queue closed by deregistration; say goodbye.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let sent =
                    tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(frame.into())))
                        .await;
                match sent {
                    Ok(Ok(())) => failures = 0,
                    _ => {
                        failures += 1;
                        warn!(%user_id, failures, "write failed");
                        if failures >= MAX_WRITE_FAILURES {
                            break;
                        }
                    }
                }
            }
            _ = ping.tick() => {
                let sent =
                    tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Ping(Vec::new().into())))
                        .await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!(%user_id, "ping failed, closing connection");
                    break;
                }
            }
        }
    }
}
