use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::piece::{PieceKind, Rotation};
use crate::player::{PlayerState, LEVEL_UP_LINES};

/// Auto-fall interval at level 1; each level shaves 40 ms off.
const INITIAL_FALL_INTERVAL: Duration = Duration::from_millis(600);
const MIN_FALL_INTERVAL: Duration = Duration::from_millis(100);

/// A player input. The wire form is the snake_case action string; `rotate`
/// is the historical alias for a clockwise turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    MoveLeft,
    MoveRight,
    #[serde(alias = "rotate")]
    RotateRight,
    RotateLeft,
    SoftDrop,
    HardDrop,
    Hold,
}

/// Auto-fall interval for a level: 600 ms at level 1, 40 ms faster per
/// level, floored at 100 ms.
pub fn gravity_interval(level: u32) -> Duration {
    let step = Duration::from_millis(40) * level.saturating_sub(1);
    INITIAL_FALL_INTERVAL
        .checked_sub(step)
        .unwrap_or(MIN_FALL_INTERVAL)
        .max(MIN_FALL_INTERVAL)
}

/// Rule bonus for a clear, on top of the per-cell payout: base score by
/// line count times level, a combo bonus from the second consecutive clear
/// on, and a 1.5x multiplier while back-to-back is armed.
pub fn clear_bonus(lines: u32, level: u32, consecutive: u32, back_to_back: bool) -> u32 {
    let base = match lines {
        1 => 100,
        2 => 300,
        3 => 500,
        4 => 800,
        _ => 0,
    };
    let mut bonus = base * level;
    if consecutive > 1 {
        bonus += 50 * (consecutive - 1) * level;
    }
    if back_to_back && lines > 0 {
        bonus = (bonus as f64 * 1.5) as u32;
    }
    bonus
}

/// Applies one input to a player. Returns whether the state changed, which
/// the session manager uses to decide on an immediate snapshot. Inputs are
/// silently rejected once the player is game-over or has no current piece.
pub fn apply_input(state: &mut PlayerState, action: Action, now: Instant) -> bool {
    if state.game_over || state.current.is_none() {
        return false;
    }

    let mut changed = false;

    match action {
        Action::MoveLeft => {
            if !collides_current(state, -1, 0) {
                state.current.as_mut().unwrap().x -= 1;
                changed = true;
            }
        }
        Action::MoveRight => {
            if !collides_current(state, 1, 0) {
                state.current.as_mut().unwrap().x += 1;
                changed = true;
            }
        }
        Action::RotateRight => {
            changed = try_rotate(state, Rotation::cw);
        }
        Action::RotateLeft => {
            changed = try_rotate(state, Rotation::ccw);
        }
        Action::SoftDrop => {
            if !collides_current(state, 0, 1) {
                state.current.as_mut().unwrap().y += 1;
                state.score += 1;
            } else {
                merge_and_lock(state);
            }
            state.reset_fall(now);
            changed = true;
        }
        Action::HardDrop => {
            let mut distance = 0;
            while !collides_current(state, 0, distance + 1) {
                distance += 1;
            }
            let piece = state.current.as_mut().unwrap();
            piece.y += distance;
            state.score += 2 * distance as u32;
            merge_and_lock(state);
            state.reset_fall(now);
            changed = true;
        }
        Action::Hold => {
            changed = hold_current(state);
        }
    }

    if changed && state.current.is_some() && action != Action::HardDrop {
        state.update_current_piece_scores();
    }

    changed
}

/// Periodic gravity: once the level's interval has elapsed the piece drops
/// a row, or locks if it cannot. Returns whether the piece descended.
pub fn auto_fall(state: &mut PlayerState, now: Instant) -> bool {
    if state.game_over || state.current.is_none() {
        return false;
    }
    if now.duration_since(state.last_fall) < gravity_interval(state.level) {
        return false;
    }

    if !collides_current(state, 0, 1) {
        state.current.as_mut().unwrap().y += 1;
        state.reset_fall(now);
        true
    } else {
        merge_and_lock(state);
        state.reset_fall(now);
        false
    }
}

fn collides_current(state: &PlayerState, dx: i32, dy: i32) -> bool {
    state
        .current
        .as_ref()
        .map(|piece| state.board.collides(piece, dx, dy))
        .unwrap_or(true)
}

fn try_rotate(state: &mut PlayerState, turn: fn(Rotation) -> Rotation) -> bool {
    let piece = state.current.as_mut().unwrap();
    if piece.kind == PieceKind::O {
        // O has a single layout; the turn is accepted and does nothing.
        return true;
    }
    let original = piece.rotation;
    piece.rotation = turn(original);
    if state.board.collides(state.current.as_ref().unwrap(), 0, 0) {
        state.current.as_mut().unwrap().rotation = original;
        false
    } else {
        true
    }
}

/// Swaps the current piece with the held one (or parks it and promotes the
/// next piece on first use). At most one hold per spawned piece; the
/// swapped-in piece spawning into a collision is a top-out.
fn hold_current(state: &mut PlayerState) -> bool {
    if state.hold_used {
        return false;
    }

    let mut parked = state.current.take().unwrap();
    parked.x = 0;
    parked.y = 0;
    parked.rotation = Rotation::R0;

    let mut incoming = match state.held.take() {
        Some(held) => held,
        None => {
            let next = state.next.take().unwrap_or_else(|| state.draw_piece());
            state.next = Some(state.draw_piece());
            next
        }
    };
    incoming.place_at_spawn();

    state.held = Some(parked);
    state.current = Some(incoming);
    state.hold_used = true;

    if state.board.collides(state.current.as_ref().unwrap(), 0, 0) {
        state.game_over = true;
    }
    true
}

/// The full lock sequence: fix the piece onto the board, stamp its payload
/// into the per-cell scores, clear lines and pay them out, apply the rule
/// bonus, update the combo counters, recompute the level, spawn the next
/// piece.
fn merge_and_lock(state: &mut PlayerState) {
    let piece = state.current.as_ref().unwrap().clone();
    state.board.merge(&piece);

    for &(dx, dy) in piece.blocks().iter() {
        let x = piece.x + dx;
        let y = piece.y + dy;
        if (0..crate::board::BOARD_WIDTH as i32).contains(&x)
            && (0..crate::board::BOARD_HEIGHT as i32).contains(&y)
        {
            if let Some(score) = piece.payload.get(piece.rotation, dx, dy) {
                state.cell_scores.set(y as usize, x as usize, score);
            }
        }
    }

    let (lines, payout) = state.board.clear_lines(&state.cell_scores);
    state.lines_cleared += lines;
    state.score += payout;

    if lines > 0 {
        state.score += clear_bonus(lines, state.level, state.consecutive_clears, state.back_to_back);
        state.consecutive_clears += 1;
        state.back_to_back = lines == 4;
        state.level = state.lines_cleared / LEVEL_UP_LINES + 1;
    } else {
        state.consecutive_clears = 0;
        state.back_to_back = false;
    }

    state.spawn_next();
}
