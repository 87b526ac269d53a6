use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::bag::BagQueue;
use crate::board::{Board, ScoreMap, BOARD_HEIGHT, BOARD_WIDTH};
use crate::deck::DeckPlacement;
use crate::piece::{Piece, ScorePayload, DEFAULT_BLOCK_SCORE};

/// Lines required per level step; level = lines/5 + 1.
pub const LEVEL_UP_LINES: u32 = 5;

/// Random per-cell scores fall in this range when no deck is supplied.
const RANDOM_SCORE_RANGE: std::ops::Range<u32> = 100..500;

/// Everything one player owns inside a match: the playfield, the piece
/// pipeline, the score state, and the per-cell contribution scores that
/// line clears pay out.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub user_id: String,
    pub board: Board,
    pub current: Option<Piece>,
    pub next: Option<Piece>,
    pub held: Option<Piece>,
    pub score: u32,
    pub lines_cleared: u32,
    pub level: u32,
    pub game_over: bool,
    pub cell_scores: ScoreMap,
    pub current_piece_scores: ScoreMap,
    pub consecutive_clears: u32,
    pub back_to_back: bool,
    deck: Vec<DeckPlacement>,
    bag: BagQueue,
    rng: SmallRng,
    pub(crate) last_fall: Instant,
    pub(crate) hold_used: bool,
}

impl PlayerState {
    /// A player backed by deck placements. An empty deck falls back to
    /// uniform random cell scores, the same as [`PlayerState::new`].
    pub fn with_deck(user_id: impl Into<String>, deck: Vec<DeckPlacement>) -> Self {
        Self::with_seed(user_id, deck, rand::rng().random())
    }

    /// A player with no deck: every cell gets a uniform random score.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_deck(user_id, Vec::new())
    }

    /// Deterministic constructor; the seed drives both the bag sequence and
    /// the random score fill.
    pub fn with_seed(user_id: impl Into<String>, deck: Vec<DeckPlacement>, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let bag = BagQueue::new(rng.random());

        let mut state = PlayerState {
            user_id: user_id.into(),
            board: Board::new(),
            current: None,
            next: None,
            held: None,
            score: 0,
            lines_cleared: 0,
            level: 1,
            game_over: false,
            cell_scores: ScoreMap::new(),
            current_piece_scores: ScoreMap::new(),
            consecutive_clears: 0,
            back_to_back: false,
            deck,
            bag,
            rng,
            last_fall: Instant::now(),
            hold_used: false,
        };

        state.init_cell_scores();
        state.spawn_next();
        state
    }

    /// Projects the deck's block scores onto board coordinates once, with
    /// every other cell at the default; without a deck every cell gets a
    /// uniform random score instead.
    fn init_cell_scores(&mut self) {
        if self.deck.is_empty() {
            for y in 0..BOARD_HEIGHT {
                for x in 0..BOARD_WIDTH {
                    let score = self.rng.random_range(RANDOM_SCORE_RANGE);
                    self.cell_scores.set(y, x, score);
                }
            }
            return;
        }

        for y in 0..BOARD_HEIGHT {
            for x in 0..BOARD_WIDTH {
                self.cell_scores.set(y, x, DEFAULT_BLOCK_SCORE);
            }
        }
        for placement in &self.deck {
            for block in &placement.blocks {
                if (0..BOARD_WIDTH as i32).contains(&block.x)
                    && (0..BOARD_HEIGHT as i32).contains(&block.y)
                {
                    self.cell_scores
                        .set(block.y as usize, block.x as usize, block.score);
                }
            }
        }
    }

    /// Draws the next piece kind from the bag and attaches the score payload
    /// of the matching deck placement, if the deck has one.
    pub(crate) fn draw_piece(&mut self) -> Piece {
        let kind = self.bag.next_kind();
        match self.deck.iter().find(|p| p.kind == kind) {
            Some(placement) => {
                Piece::with_payload(kind, ScorePayload::from_deck_blocks(kind, &placement.blocks))
            }
            None => Piece::new(kind),
        }
    }

    /// Promotes the next piece to current (drawing fresh ones as needed),
    /// places it at the spawn origin, re-arms hold, and flips game-over if
    /// the spawn position already collides.
    pub fn spawn_next(&mut self) {
        let mut piece = match self.next.take() {
            Some(piece) => piece,
            None => self.draw_piece(),
        };
        piece.place_at_spawn();
        self.next = Some(self.draw_piece());
        self.current = Some(piece);
        self.hold_used = false;
        self.update_current_piece_scores();

        if let Some(current) = &self.current {
            if self.board.collides(current, 0, 0) {
                self.game_over = true;
            }
        }
    }

    /// Score a block of `piece` would stamp at board position `(x, y)`:
    /// payload first, then the cell's own score, then the default.
    pub fn score_at(&self, piece: &Piece, x: i32, y: i32) -> u32 {
        piece
            .payload
            .get(piece.rotation, x - piece.x, y - piece.y)
            .or_else(|| {
                if (0..BOARD_WIDTH as i32).contains(&x) && (0..BOARD_HEIGHT as i32).contains(&y) {
                    self.cell_scores.get(y as usize, x as usize)
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_BLOCK_SCORE)
    }

    /// Rebuilds the small map the clients use to color the falling piece.
    pub fn update_current_piece_scores(&mut self) {
        let mut scores = ScoreMap::new();
        if let Some(piece) = &self.current {
            for &(dx, dy) in piece.blocks().iter() {
                let x = piece.x + dx;
                let y = piece.y + dy;
                if (0..BOARD_WIDTH as i32).contains(&x) && (0..BOARD_HEIGHT as i32).contains(&y) {
                    scores.set(y as usize, x as usize, self.score_at(piece, x, y));
                }
            }
        }
        self.current_piece_scores = scores;
    }

    pub(crate) fn reset_fall(&mut self, now: Instant) {
        self.last_fall = now;
    }
}
