pub mod bag;
pub mod board;
pub mod deck;
pub mod piece;
pub mod player;
pub mod protocol;
pub mod rules;
pub mod session;

pub use board::{Board, Cell, ScoreMap, BOARD_HEIGHT, BOARD_WIDTH};
pub use deck::{DeckBlock, DeckPlacement};
pub use piece::{Piece, PieceKind, Rotation};
pub use player::PlayerState;
pub use rules::{apply_input, auto_fall, Action};
pub use session::{
    GameSession, PlayerSnapshot, SessionSnapshot, SessionStatus, SESSION_TIME_LIMIT,
};
