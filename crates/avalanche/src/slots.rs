//! Flat slot array for stake-weighted peer selection.
//!
//! Each accepted peer owns one [`Slot`]: a half-open window
//! `[start, start + score)` on a cumulative score line. Selection draws a
//! uniform point on `[0, total)` and binary-searches for the window
//! containing it, so a peer's probability of selection is proportional to
//! its score.
//!
//! Removal does not shift the array: the slot is tombstoned in place
//! (`peer_id = NO_PEER`) so every other peer's index stays valid, and the
//! dead width is tracked as fragmentation until the manager compacts. A
//! draw landing in a tombstone or in the gap between windows simply misses;
//! callers retry a bounded number of times.

use crate::{PeerId, NO_PEER};

/// One peer's window on the cumulative score line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    start: u64,
    score: u32,
    peer_id: PeerId,
}

impl Slot {
    pub fn new(start: u64, score: u32, peer_id: PeerId) -> Self {
        Self {
            start,
            score,
            peer_id,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last point of the window.
    pub fn stop(&self) -> u64 {
        self.start + u64::from(self.score)
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Whether the draw `s` lands inside this window.
    pub fn contains(&self, s: u64) -> bool {
        self.start <= s && s < self.stop()
    }

    pub fn with_start(self, start: u64) -> Self {
        Self { start, ..self }
    }

    pub fn with_score(self, score: u32) -> Self {
        Self { score, ..self }
    }

    pub fn with_peer_id(self, peer_id: PeerId) -> Self {
        Self { peer_id, ..self }
    }
}

/// Find the peer whose window contains `s`, or [`NO_PEER`].
///
/// `slots` must be sorted by start with non-overlapping windows, and
/// `s < max` must hold for a meaningful draw; out-of-range values miss.
/// Tombstoned windows report their own `peer_id`, which is [`NO_PEER`].
pub fn select_peer_impl(slots: &[Slot], s: u64, max: u64) -> PeerId {
    if s >= max {
        return NO_PEER;
    }

    // Last slot starting at or before s, if any.
    let i = slots.partition_point(|slot| slot.start() <= s);
    if i == 0 {
        return NO_PEER;
    }

    let slot = &slots[i - 1];
    if slot.contains(s) {
        slot.peer_id()
    } else {
        NO_PEER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_window() {
        let slot = Slot::new(100, 100, 23);
        assert_eq!(slot.stop(), 200);
        assert!(!slot.contains(99));
        assert!(slot.contains(100));
        assert!(slot.contains(199));
        assert!(!slot.contains(200));
    }

    #[test]
    fn test_select_peer_empty() {
        assert_eq!(select_peer_impl(&[], 0, 0), NO_PEER);
        assert_eq!(select_peer_impl(&[], 1, 3), NO_PEER);
    }

    #[test]
    fn test_select_peer_one_slot() {
        let slots = [Slot::new(100, 100, 23)];

        // Undershoot.
        assert_eq!(select_peer_impl(&slots, 0, 300), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 42, 300), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 99, 300), NO_PEER);

        // Nailed it.
        assert_eq!(select_peer_impl(&slots, 100, 300), 23);
        assert_eq!(select_peer_impl(&slots, 142, 300), 23);
        assert_eq!(select_peer_impl(&slots, 199, 300), 23);

        // Overshoot.
        assert_eq!(select_peer_impl(&slots, 200, 300), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 242, 300), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 299, 300), NO_PEER);
    }

    #[test]
    fn test_select_peer_two_slots_with_gap() {
        let slots = [Slot::new(100, 100, 69), Slot::new(300, 100, 42)];

        assert_eq!(select_peer_impl(&slots, 0, 500), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 99, 500), NO_PEER);

        assert_eq!(select_peer_impl(&slots, 100, 500), 69);
        assert_eq!(select_peer_impl(&slots, 199, 500), 69);

        // The gap between the windows.
        assert_eq!(select_peer_impl(&slots, 200, 500), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 299, 500), NO_PEER);

        assert_eq!(select_peer_impl(&slots, 300, 500), 42);
        assert_eq!(select_peer_impl(&slots, 399, 500), 42);

        assert_eq!(select_peer_impl(&slots, 400, 500), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 499, 500), NO_PEER);
    }

    #[test]
    fn test_select_peer_dichotomic() {
        // 100 peers of width 1 with 1 empty point between each.
        let mut slots = Vec::new();
        let mut max = 1u64;
        for i in 0..100u32 {
            slots.push(Slot::new(max, 1, i));
            max += 2;
        }

        for i in 0..100u64 {
            assert_eq!(select_peer_impl(&slots, 2 * i, max), NO_PEER);
            assert_eq!(select_peer_impl(&slots, 2 * i + 1, max), i as PeerId);
        }
        assert_eq!(select_peer_impl(&slots, max, max), NO_PEER);

        // Skew heavily toward the last element.
        slots[99] = slots[99].with_score(101);
        let max = slots[99].stop();
        assert_eq!(max, 300);

        for i in 0..100u64 {
            assert_eq!(select_peer_impl(&slots, 2 * i, max), NO_PEER);
            assert_eq!(select_peer_impl(&slots, 2 * i + 1, max), i as PeerId);
        }
        assert_eq!(select_peer_impl(&slots, 200, max), 99);
        assert_eq!(select_peer_impl(&slots, 256, max), 99);
        assert_eq!(select_peer_impl(&slots, 299, max), 99);
        assert_eq!(select_peer_impl(&slots, 300, max), NO_PEER);
    }

    #[test]
    fn test_select_peer_tombstone_hit() {
        let slots = [
            Slot::new(0, 100, 1),
            Slot::new(100, 100, NO_PEER),
            Slot::new(200, 100, 2),
        ];

        assert_eq!(select_peer_impl(&slots, 50, 300), 1);
        assert_eq!(select_peer_impl(&slots, 150, 300), NO_PEER);
        assert_eq!(select_peer_impl(&slots, 250, 300), 2);
    }

    #[test]
    fn test_select_peer_random_structure() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let size: usize = rng.gen_range(1..=1024);
            let mut slots = Vec::with_capacity(size);

            let mut max: u64 = rng.gen_range(0..8);
            for i in 0..size {
                let start = max;
                max += rng.gen_range(0u64..8);
                let score: u32 = rng.gen_range(0..8);
                max += u64::from(score);
                slots.push(Slot::new(start, score, i as PeerId));
            }

            for _ in 0..100 {
                let s = if max > 0 { rng.gen_range(0..max) } else { 0 };
                let selected = select_peer_impl(&slots, s, max);
                // The peer id is the index by construction.
                if selected != NO_PEER {
                    assert!(slots[selected as usize].contains(s));
                }
            }
        }
    }
}
