use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::piece::{Piece, PieceKind};

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;

/// Score a cleared cell pays when the score map has no entry for it.
pub const MISSING_CELL_SCORE: u32 = 10;

/// One cell of the playfield. Serialized as the numeric id the clients
/// already map to colors: 0 = empty, 1..=7 = tetromino of that kind,
/// 8 = garbage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Cell {
    Empty,
    Filled(PieceKind),
    Garbage,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> u8 {
        match cell {
            Cell::Empty => 0,
            Cell::Filled(kind) => kind as u8 + 1,
            Cell::Garbage => 8,
        }
    }
}

impl TryFrom<u8> for Cell {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Cell::Empty),
            1..=7 => Ok(Cell::Filled(PieceKind::ALL[value as usize - 1])),
            8 => Ok(Cell::Garbage),
            other => Err(format!("invalid cell value: {other}")),
        }
    }
}

/// Per-cell scores keyed by board coordinate. The wire form is a JSON map
/// with `"row_col"` keys, matching the snapshot format the clients consume.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoreMap(HashMap<(usize, usize), u32>);

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u32> {
        self.0.get(&(row, col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, score: u32) {
        self.0.insert((row, col), score);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &u32)> {
        self.0.iter()
    }
}

impl Serialize for ScoreMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for ((row, col), score) in &self.0 {
            map.serialize_entry(&format!("{row}_{col}"), score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ScoreMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoreMapVisitor;

        impl<'de> Visitor<'de> for ScoreMapVisitor {
            type Value = ScoreMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map with \"row_col\" keys and integer scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut inner = HashMap::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, score)) = access.next_entry::<String, u32>()? {
                    let (row, col) = key
                        .split_once('_')
                        .and_then(|(r, c)| Some((r.parse().ok()?, c.parse().ok()?)))
                        .ok_or_else(|| serde::de::Error::custom(format!("bad key: {key}")))?;
                    inner.insert((row, col), score);
                }
                Ok(ScoreMap(inner))
            }
        }

        deserializer.deserialize_map(ScoreMapVisitor)
    }
}

/// The 10x20 playfield. Row 0 is the top row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board([[Cell; BOARD_WIDTH]; BOARD_HEIGHT]);

impl Default for Board {
    fn default() -> Self {
        Board([[Cell::Empty; BOARD_WIDTH]; BOARD_HEIGHT])
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, row: usize, col: usize) -> Cell {
        self.0[row][col]
    }

    pub fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        self.0[row][col] = cell;
    }

    pub fn rows(&self) -> &[[Cell; BOARD_WIDTH]; BOARD_HEIGHT] {
        &self.0
    }

    /// True if any block of `piece`, translated by `(dx, dy)`, leaves the
    /// side or bottom bounds or lands on a non-empty cell. Rows above the
    /// board (`y < 0`) are the spawn region and never collide with content.
    pub fn collides(&self, piece: &Piece, dx: i32, dy: i32) -> bool {
        piece.blocks().iter().any(|&(bx, by)| {
            let x = piece.x + bx + dx;
            let y = piece.y + by + dy;
            if x < 0 || x >= BOARD_WIDTH as i32 || y >= BOARD_HEIGHT as i32 {
                return true;
            }
            y >= 0 && !self.0[y as usize][x as usize].is_empty()
        })
    }

    /// Fixes the piece onto the board. Blocks outside the playfield are
    /// dropped; ceiling overflow is the spawn check's problem, not merge's.
    pub fn merge(&mut self, piece: &Piece) {
        for &(bx, by) in piece.blocks().iter() {
            let x = piece.x + bx;
            let y = piece.y + by;
            if (0..BOARD_WIDTH as i32).contains(&x) && (0..BOARD_HEIGHT as i32).contains(&y) {
                self.0[y as usize][x as usize] = Cell::Filled(piece.kind);
            }
        }
    }

    /// Removes every full row, packing survivors downward in order. Each
    /// cleared cell pays its entry in `scores` (or [`MISSING_CELL_SCORE`]).
    /// Returns the number of cleared lines and the total payout.
    pub fn clear_lines(&mut self, scores: &ScoreMap) -> (u32, u32) {
        let mut cleared = 0u32;
        let mut payout = 0u32;
        let mut packed = Board::new();
        let mut dest = BOARD_HEIGHT as i32 - 1;

        for y in (0..BOARD_HEIGHT).rev() {
            let full = self.0[y].iter().all(|cell| !cell.is_empty());
            if full {
                cleared += 1;
                for x in 0..BOARD_WIDTH {
                    payout += scores.get(y, x).unwrap_or(MISSING_CELL_SCORE);
                }
            } else {
                packed.0[dest as usize] = self.0[y];
                dest -= 1;
            }
        }

        *self = packed;
        (cleared, payout)
    }

    /// Shifts the board up by `count` rows and fills the bottom with garbage
    /// rows, each with a single random hole. A count covering the whole
    /// board just clears it.
    pub fn add_garbage(&mut self, rng: &mut impl Rng, count: usize) {
        if count == 0 {
            return;
        }
        if count >= BOARD_HEIGHT {
            *self = Board::new();
            return;
        }

        for y in 0..BOARD_HEIGHT - count {
            self.0[y] = self.0[y + count];
        }
        for y in BOARD_HEIGHT - count..BOARD_HEIGHT {
            let hole = rng.random_range(0..BOARD_WIDTH);
            for x in 0..BOARD_WIDTH {
                self.0[y][x] = if x == hole { Cell::Empty } else { Cell::Garbage };
            }
        }
    }
}
