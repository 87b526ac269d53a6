use serde::{Deserialize, Serialize};

use crate::board::BOARD_WIDTH;
use crate::deck::DeckBlock;

/// Default score for blocks whose deck entry carries no value.
pub const DEFAULT_BLOCK_SCORE: u32 = 100;

/// The seven tetromino kinds. The discriminant order is the cell-id order
/// used on the wire (I = cell 1, ... L = cell 7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::O,
        PieceKind::T,
        PieceKind::S,
        PieceKind::Z,
        PieceKind::J,
        PieceKind::L,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PieceKind::I => "I",
            PieceKind::O => "O",
            PieceKind::T => "T",
            PieceKind::S => "S",
            PieceKind::Z => "Z",
            PieceKind::J => "J",
            PieceKind::L => "L",
        }
    }
}

impl std::str::FromStr for PieceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" => Ok(PieceKind::I),
            "O" => Ok(PieceKind::O),
            "T" => Ok(PieceKind::T),
            "S" => Ok(PieceKind::S),
            "Z" => Ok(PieceKind::Z),
            "J" => Ok(PieceKind::J),
            "L" => Ok(PieceKind::L),
            other => Err(format!("unknown piece kind: {other}")),
        }
    }
}

/// Rotation state in degrees. O-pieces ignore it entirely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn cw(self) -> Rotation {
        match self {
            Rotation::R0 => Rotation::R90,
            Rotation::R90 => Rotation::R180,
            Rotation::R180 => Rotation::R270,
            Rotation::R270 => Rotation::R0,
        }
    }

    pub fn ccw(self) -> Rotation {
        match self {
            Rotation::R0 => Rotation::R270,
            Rotation::R90 => Rotation::R0,
            Rotation::R180 => Rotation::R90,
            Rotation::R270 => Rotation::R180,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub const ALL: [Rotation; 4] = [
        Rotation::R0,
        Rotation::R90,
        Rotation::R180,
        Rotation::R270,
    ];
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r as u16 * 90
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::R0),
            90 => Ok(Rotation::R90),
            180 => Ok(Rotation::R180),
            270 => Ok(Rotation::R270),
            other => Err(format!("invalid rotation: {other}")),
        }
    }
}

/// Shape-local block offsets per kind and rotation state. The offsets are
/// fixed tables; the I horizontal row sits at dy=1 so a fresh spawn is fully
/// visible on the board.
const SHAPES: [[[(i32, i32); 4]; 4]; 7] = [
    // I
    [
        [(0, 1), (1, 1), (2, 1), (3, 1)],
        [(2, 0), (2, 1), (2, 2), (2, 3)],
        [(0, 2), (1, 2), (2, 2), (3, 2)],
        [(1, 0), (1, 1), (1, 2), (1, 3)],
    ],
    // O — the same layout in every rotation state.
    [
        [(0, 0), (1, 0), (0, 1), (1, 1)],
        [(0, 0), (1, 0), (0, 1), (1, 1)],
        [(0, 0), (1, 0), (0, 1), (1, 1)],
        [(0, 0), (1, 0), (0, 1), (1, 1)],
    ],
    // T
    [
        [(1, 0), (0, 1), (1, 1), (2, 1)],
        [(1, 0), (1, 1), (2, 1), (1, 2)],
        [(0, 1), (1, 1), (2, 1), (1, 2)],
        [(0, 1), (1, 0), (1, 1), (1, 2)],
    ],
    // S
    [
        [(1, 0), (2, 0), (0, 1), (1, 1)],
        [(1, 0), (1, 1), (2, 1), (2, 2)],
        [(1, 1), (2, 1), (0, 2), (1, 2)],
        [(0, 0), (0, 1), (1, 1), (1, 2)],
    ],
    // Z
    [
        [(0, 0), (1, 0), (1, 1), (2, 1)],
        [(2, 0), (1, 1), (2, 1), (1, 2)],
        [(0, 1), (1, 1), (1, 2), (2, 2)],
        [(1, 0), (0, 1), (1, 1), (0, 2)],
    ],
    // J
    [
        [(0, 0), (0, 1), (1, 1), (2, 1)],
        [(1, 0), (2, 0), (1, 1), (1, 2)],
        [(0, 1), (1, 1), (2, 1), (2, 2)],
        [(1, 0), (1, 1), (0, 2), (1, 2)],
    ],
    // L
    [
        [(2, 0), (0, 1), (1, 1), (2, 1)],
        [(1, 0), (1, 1), (1, 2), (2, 2)],
        [(0, 1), (1, 1), (2, 1), (0, 2)],
        [(0, 0), (1, 0), (1, 1), (1, 2)],
    ],
];

/// Block offsets for `kind` at `rotation` in table order.
pub fn shape_blocks(kind: PieceKind, rotation: Rotation) -> [(i32, i32); 4] {
    let rot = if kind == PieceKind::O { 0 } else { rotation.index() };
    SHAPES[kind as usize][rot]
}

/// Spawn origin for a fresh piece: centered, with every block on-board.
pub fn spawn_origin(kind: PieceKind) -> (i32, i32) {
    match kind {
        PieceKind::I => (BOARD_WIDTH as i32 / 2 - 2, 1),
        _ => (BOARD_WIDTH as i32 / 2 - 1, 1),
    }
}

/// Per-block scores for every rotation state of one piece, keyed by
/// `(rotation, dx, dy)`. The key domain is dense and tiny, so this is a flat
/// array indexed `rotation * 16 + dy * 4 + dx`; zero means "no score".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScorePayload([u32; 64]);

impl Default for ScorePayload {
    fn default() -> Self {
        ScorePayload([0; 64])
    }
}

impl ScorePayload {
    /// Pairs the i-th shape block of each rotation state with the i-th deck
    /// block's score. Missing deck entries default to [`DEFAULT_BLOCK_SCORE`].
    pub fn from_deck_blocks(kind: PieceKind, blocks: &[DeckBlock]) -> Self {
        let mut payload = ScorePayload::default();
        for rotation in Rotation::ALL {
            for (i, &(dx, dy)) in shape_blocks(kind, rotation).iter().enumerate() {
                let score = blocks
                    .get(i)
                    .map(|b| b.score)
                    .unwrap_or(DEFAULT_BLOCK_SCORE);
                payload.set(rotation, dx, dy, score);
            }
        }
        payload
    }

    pub fn get(&self, rotation: Rotation, dx: i32, dy: i32) -> Option<u32> {
        let idx = Self::index(rotation, dx, dy)?;
        match self.0[idx] {
            0 => None,
            score => Some(score),
        }
    }

    pub fn set(&mut self, rotation: Rotation, dx: i32, dy: i32, score: u32) {
        if let Some(idx) = Self::index(rotation, dx, dy) {
            self.0[idx] = score;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&s| s == 0)
    }

    fn index(rotation: Rotation, dx: i32, dy: i32) -> Option<usize> {
        if !(0..4).contains(&dx) || !(0..4).contains(&dy) {
            return None;
        }
        Some(rotation.index() * 16 + dy as usize * 4 + dx as usize)
    }
}

/// A falling tetromino: kind, anchor position, rotation, and the score
/// payload its blocks will stamp onto the board when it locks. The payload
/// never goes over the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Piece {
    #[serde(rename = "type")]
    pub kind: PieceKind,
    pub x: i32,
    pub y: i32,
    pub rotation: Rotation,
    #[serde(skip)]
    pub payload: ScorePayload,
}

impl Piece {
    pub fn new(kind: PieceKind) -> Self {
        Piece {
            kind,
            x: 0,
            y: 0,
            rotation: Rotation::R0,
            payload: ScorePayload::default(),
        }
    }

    pub fn with_payload(kind: PieceKind, payload: ScorePayload) -> Self {
        Piece {
            payload,
            ..Piece::new(kind)
        }
    }

    /// Block offsets at the current rotation state.
    pub fn blocks(&self) -> [(i32, i32); 4] {
        shape_blocks(self.kind, self.rotation)
    }

    /// Clockwise quarter turn. No-op for O. Collision is the caller's
    /// responsibility (test-and-revert, no wall kicks).
    pub fn rotate_cw(&mut self) {
        if self.kind != PieceKind::O {
            self.rotation = self.rotation.cw();
        }
    }

    /// Counter-clockwise quarter turn. No-op for O.
    pub fn rotate_ccw(&mut self) {
        if self.kind != PieceKind::O {
            self.rotation = self.rotation.ccw();
        }
    }

    /// Moves the piece to its spawn origin with rotation reset.
    pub fn place_at_spawn(&mut self) {
        let (x, y) = spawn_origin(self.kind);
        self.x = x;
        self.y = y;
        self.rotation = Rotation::R0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_offsets_stay_in_four_by_four() {
        for kind in PieceKind::ALL {
            for rotation in Rotation::ALL {
                for (dx, dy) in shape_blocks(kind, rotation) {
                    assert!((0..4).contains(&dx), "{kind:?} {rotation:?} dx={dx}");
                    assert!((0..4).contains(&dy), "{kind:?} {rotation:?} dy={dy}");
                }
            }
        }
    }

    #[test]
    fn every_shape_has_four_distinct_blocks() {
        for kind in PieceKind::ALL {
            for rotation in Rotation::ALL {
                let mut blocks = shape_blocks(kind, rotation).to_vec();
                blocks.sort_unstable();
                blocks.dedup();
                assert_eq!(blocks.len(), 4, "{kind:?} {rotation:?}");
            }
        }
    }

    #[test]
    fn i_spawn_row_is_visible() {
        assert_eq!(
            shape_blocks(PieceKind::I, Rotation::R0),
            [(0, 1), (1, 1), (2, 1), (3, 1)]
        );
    }

    #[test]
    fn o_ignores_rotation() {
        let mut piece = Piece::new(PieceKind::O);
        piece.rotate_cw();
        assert_eq!(piece.rotation, Rotation::R0);
        piece.rotate_ccw();
        assert_eq!(piece.rotation, Rotation::R0);
        for rotation in Rotation::ALL {
            assert_eq!(
                shape_blocks(PieceKind::O, rotation),
                shape_blocks(PieceKind::O, Rotation::R0)
            );
        }
    }

    #[test]
    fn rotation_wraps_both_ways() {
        let mut piece = Piece::new(PieceKind::T);
        for expected in [Rotation::R90, Rotation::R180, Rotation::R270, Rotation::R0] {
            piece.rotate_cw();
            assert_eq!(piece.rotation, expected);
        }
        piece.rotate_ccw();
        assert_eq!(piece.rotation, Rotation::R270);
    }

    #[test]
    fn rotation_serializes_as_degrees() {
        let json = serde_json::to_value(Rotation::R270).unwrap();
        assert_eq!(json, 270);
        let back: Rotation = serde_json::from_value(json).unwrap();
        assert_eq!(back, Rotation::R270);
    }

    #[test]
    fn spawn_origin_centers_pieces() {
        assert_eq!(spawn_origin(PieceKind::I), (3, 1));
        assert_eq!(spawn_origin(PieceKind::O), (4, 1));
        assert_eq!(spawn_origin(PieceKind::T), (4, 1));
    }

    #[test]
    fn payload_pairs_blocks_in_table_order() {
        let blocks = vec![
            DeckBlock { x: 0, y: 0, score: 11 },
            DeckBlock { x: 1, y: 0, score: 22 },
            DeckBlock { x: 2, y: 0, score: 33 },
            DeckBlock { x: 3, y: 0, score: 44 },
        ];
        let payload = ScorePayload::from_deck_blocks(PieceKind::I, &blocks);
        // Horizontal I at rotation 0: i-th block offset is (i, 1).
        assert_eq!(payload.get(Rotation::R0, 0, 1), Some(11));
        assert_eq!(payload.get(Rotation::R0, 3, 1), Some(44));
        // Vertical I at 90 degrees: i-th block offset is (2, i).
        assert_eq!(payload.get(Rotation::R90, 2, 0), Some(11));
        assert_eq!(payload.get(Rotation::R90, 2, 3), Some(44));
    }

    #[test]
    fn payload_defaults_missing_deck_entries() {
        let blocks = vec![DeckBlock { x: 0, y: 0, score: 500 }];
        let payload = ScorePayload::from_deck_blocks(PieceKind::O, &blocks);
        assert_eq!(payload.get(Rotation::R0, 0, 0), Some(500));
        assert_eq!(payload.get(Rotation::R0, 1, 0), Some(DEFAULT_BLOCK_SCORE));
    }

    #[test]
    fn piece_wire_form_omits_payload() {
        let piece = Piece::with_payload(
            PieceKind::Z,
            ScorePayload::from_deck_blocks(PieceKind::Z, &[]),
        );
        let json = serde_json::to_value(&piece).unwrap();
        assert_eq!(json["type"], "Z");
        assert_eq!(json["rotation"], 0);
        assert!(json.get("payload").is_none());
    }
}
