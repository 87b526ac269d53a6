use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::board::{Board, ScoreMap};
use crate::piece::Piece;
use crate::player::PlayerState;

/// Hard wall-clock budget for a match.
pub const SESSION_TIME_LIMIT: Duration = Duration::from_secs(100);

/// Room state machine: waiting for the second player and both connections,
/// playing, finished. Transitions only ever move rightward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Playing,
    Finished,
}

/// A two-player match, identified by the passphrase that created it.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub id: String,
    pub player1: PlayerState,
    pub player2: Option<PlayerState>,
    pub status: SessionStatus,
    pub time_limit: Duration,
    started_at: Option<Instant>,
    started_epoch: Option<u64>,
    ended_epoch: Option<u64>,
}

impl GameSession {
    pub fn new(id: impl Into<String>, player1: PlayerState) -> Self {
        GameSession {
            id: id.into(),
            player1,
            player2: None,
            status: SessionStatus::Waiting,
            time_limit: SESSION_TIME_LIMIT,
            started_at: None,
            started_epoch: None,
            ended_epoch: None,
        }
    }

    /// Installs the second player. A second call is ignored; player1's piece
    /// pipeline is untouched either way.
    pub fn set_player2(&mut self, player2: PlayerState) {
        if self.player2.is_none() {
            self.player2 = Some(player2);
        }
    }

    /// Marks the match live and stamps the start time.
    pub fn start(&mut self, now: Instant) {
        self.status = SessionStatus::Playing;
        self.started_at = Some(now);
        self.started_epoch = Some(unix_now());
    }

    /// Marks the match over and stamps the end time. Idempotent.
    pub fn finish(&mut self) {
        if self.status == SessionStatus::Finished {
            return;
        }
        self.status = SessionStatus::Finished;
        self.ended_epoch = Some(unix_now());
    }

    /// True once a playing match has used up its time budget.
    pub fn is_time_up(&self, now: Instant) -> bool {
        if self.status != SessionStatus::Playing {
            return false;
        }
        match self.started_at {
            Some(started) => now.duration_since(started) >= self.time_limit,
            None => false,
        }
    }

    /// Whole seconds left on the clock; zero unless the match is playing.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        if self.status != SessionStatus::Playing {
            return 0;
        }
        match self.started_at {
            Some(started) => self
                .time_limit
                .saturating_sub(now.duration_since(started))
                .as_secs(),
            None => 0,
        }
    }

    pub fn player_mut(&mut self, user_id: &str) -> Option<&mut PlayerState> {
        if self.player1.user_id == user_id {
            return Some(&mut self.player1);
        }
        self.player2
            .as_mut()
            .filter(|p| p.user_id == user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.player1.user_id == user_id
            || self
                .player2
                .as_ref()
                .is_some_and(|p| p.user_id == user_id)
    }

    pub fn both_game_over(&self) -> bool {
        self.player1.game_over
            && self
                .player2
                .as_ref()
                .is_some_and(|p| p.game_over)
    }

    /// The wire projection sent to clients. Internal machinery — RNGs, the
    /// bag, fall timers, deck placements, the hold flag — stays out.
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            player1: Some(PlayerSnapshot::of(&self.player1)),
            player2: self.player2.as_ref().map(PlayerSnapshot::of),
            status: self.status,
            started_at: self.started_epoch,
            ended_at: self.ended_epoch,
            time_limit: self.time_limit.as_secs(),
            remaining_time: self.remaining_secs(now),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Wire form of a session, broadcast to both clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub player1: Option<PlayerSnapshot>,
    pub player2: Option<PlayerSnapshot>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub time_limit: u64,
    pub remaining_time: u64,
}

/// Wire form of one player's public state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: String,
    pub board: Board,
    pub current_piece: Option<Piece>,
    pub next_piece: Option<Piece>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_piece: Option<Piece>,
    pub score: u32,
    pub lines_cleared: u32,
    pub level: u32,
    pub is_game_over: bool,
    pub cell_scores: ScoreMap,
    pub current_piece_scores: ScoreMap,
}

impl PlayerSnapshot {
    fn of(player: &PlayerState) -> Self {
        PlayerSnapshot {
            user_id: player.user_id.clone(),
            board: player.board.clone(),
            current_piece: player.current.clone(),
            next_piece: player.next.clone(),
            held_piece: player.held.clone(),
            score: player.score,
            lines_cleared: player.lines_cleared,
            level: player.level,
            is_game_over: player.game_over,
            cell_scores: player.cell_scores.clone(),
            current_piece_scores: player.current_piece_scores.clone(),
        }
    }
}
