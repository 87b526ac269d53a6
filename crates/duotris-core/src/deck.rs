use serde::{Deserialize, Serialize};

use crate::piece::{PieceKind, Rotation};

/// One block of a deck placement: shape-local coordinates plus the
/// contribution score the block carries into the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckBlock {
    pub x: i32,
    pub y: i32,
    pub score: u32,
}

/// A pre-built tetromino from a player's deck. The kind selects which bag
/// draws inherit this placement's block scores; the block coordinates are
/// also projected onto the board once at match start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckPlacement {
    #[serde(rename = "type")]
    pub kind: PieceKind,
    pub rotation: Rotation,
    pub blocks: Vec<DeckBlock>,
}
