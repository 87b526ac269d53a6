use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::piece::PieceKind;

/// Threshold below which the queue is topped up with a fresh bag.
const REFILL_THRESHOLD: usize = 7;

/// Buffered 7-bag piece generator. Every bag is a shuffled permutation of
/// the seven kinds, and the first element of a fresh bag is swapped away if
/// it would repeat the tail of the previous one, so the output stream never
/// contains two equal neighbours.
#[derive(Debug, Clone)]
pub struct BagQueue {
    queue: VecDeque<PieceKind>,
    rng: SmallRng,
}

impl BagQueue {
    pub fn new(seed: u64) -> Self {
        BagQueue {
            queue: VecDeque::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Draws the next kind, refilling the buffer when it runs short.
    pub fn next_kind(&mut self) -> PieceKind {
        if self.queue.len() < REFILL_THRESHOLD {
            self.refill();
        }
        self.queue.pop_front().expect("refill keeps the queue non-empty")
    }

    fn refill(&mut self) {
        let mut bag = PieceKind::ALL;
        bag.shuffle(&mut self.rng);
        if let Some(&tail) = self.queue.back() {
            if bag[0] == tail {
                let swap = self.rng.random_range(1..bag.len());
                bag.swap(0, swap);
            }
        }
        self.queue.extend(bag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn first_bag_is_a_permutation() {
        let mut bag = BagQueue::new(1);
        let kinds: HashSet<PieceKind> = (0..7).map(|_| bag.next_kind()).collect();
        assert_eq!(kinds.len(), 7);
    }

    #[test]
    fn aligned_windows_are_permutations() {
        for seed in 0..20 {
            let mut bag = BagQueue::new(seed);
            for _ in 0..10 {
                let window: HashSet<PieceKind> = (0..7).map(|_| bag.next_kind()).collect();
                assert_eq!(window.len(), 7, "seed {seed}");
            }
        }
    }

    #[test]
    fn no_adjacent_duplicates_across_bag_boundaries() {
        for seed in 0..50 {
            let mut bag = BagQueue::new(seed);
            let stream: Vec<PieceKind> = (0..7 * 40).map(|_| bag.next_kind()).collect();
            for pair in stream.windows(2) {
                assert_ne!(pair[0], pair[1], "seed {seed}: duplicate at a boundary");
            }
        }
    }

    #[test]
    fn same_seed_yields_same_stream() {
        let mut a = BagQueue::new(42);
        let mut b = BagQueue::new(42);
        for _ in 0..50 {
            assert_eq!(a.next_kind(), b.next_kind());
        }
    }
}
