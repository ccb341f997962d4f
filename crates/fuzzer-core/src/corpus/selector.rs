//! Weighted program selector (§4.3): bias selection toward programs that
//! cover rarely-seen PCs, without computing explicit per-program
//! probabilities. Selection happens in two stages — pick a PC biased toward
//! small buckets, then pick uniformly among the programs indexed under it —
//! so a program that covers several rare PCs is reachable from more doors
//! without being weighted twice at any single door.

use std::collections::HashMap;

use rand::Rng;

use crate::prog::ProgHash;
use crate::signal::Signal;

/// How many `(hash, signal_len)` records a single PC's bucket retains. On
/// overflow the smallest-signal entries are evicted first, keeping the ones
/// most likely to matter for weighted selection.
const BUCKET_CAPACITY: usize = 12;

/// How many candidate PCs to sample before committing to the one with the
/// smallest bucket (§4.3 step 1: "retry a small constant number of times").
const PC_CANDIDATES: usize = 3;

#[derive(Default)]
struct Bucket {
    // (hash, signal length at insertion time), sorted ascending by length so
    // eviction-of-smallest and cumulative weighting are both O(1)/O(n) without
    // extra bookkeeping.
    entries: Vec<(ProgHash, usize)>,
}

impl Bucket {
    fn insert(&mut self, hash: ProgHash, signal_len: usize) {
        self.entries.push((hash, signal_len));
        if self.entries.len() > BUCKET_CAPACITY {
            self.entries.sort_unstable_by_key(|&(_, len)| len);
            let drop_n = self.entries.len() - BUCKET_CAPACITY;
            self.entries.drain(0..drop_n);
        }
    }

    /// Uniform pick among the bucket's surviving entries. Signal length only
    /// decides who survives eviction (`insert`, above); once inside a
    /// bucket every entry is an equally good representative of the PC that
    /// bucket indexes, so the pick itself doesn't re-weight by length — doing
    /// so would double-count long programs that already dominate several
    /// buckets at once.
    fn choose_uniform<R: Rng>(&self, rng: &mut R) -> Option<ProgHash> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.entries.len());
        Some(self.entries[idx].0)
    }
}

/// Maps each observed PC to a bounded bucket of the programs that cover it,
/// and picks a program biased toward rare PCs.
#[derive(Default)]
pub struct Selector {
    buckets: HashMap<u64, Bucket>,
    pc_list: Vec<u64>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-admitted corpus entry. Called exactly once per
    /// entry (§4.3 invariant: "the selector sees every entry exactly once").
    pub fn insert(&mut self, hash: ProgHash, signal: &Signal) {
        let signal_len = signal.len();
        for (pc, _prio) in signal.iter() {
            if !self.buckets.contains_key(&pc) {
                self.pc_list.push(pc);
            }
            self.buckets.entry(pc).or_default().insert(hash, signal_len);
        }
    }

    /// Empty corpus / no PCs registered yet ⇒ `None` (§4.3: "Empty corpus ⇒
    /// ChooseProgram returns none").
    pub fn choose<R: Rng>(&self, rng: &mut R) -> Option<ProgHash> {
        if self.pc_list.is_empty() {
            return None;
        }
        let mut best_pc = self.pc_list[rng.gen_range(0..self.pc_list.len())];
        let mut best_fill = self.buckets.get(&best_pc).map(|b| b.entries.len()).unwrap_or(0);
        for _ in 1..PC_CANDIDATES {
            let candidate = self.pc_list[rng.gen_range(0..self.pc_list.len())];
            let fill = self.buckets.get(&candidate).map(|b| b.entries.len()).unwrap_or(0);
            if fill < best_fill {
                best_pc = candidate;
                best_fill = fill;
            }
        }
        self.buckets.get(&best_pc).and_then(|b| b.choose_uniform(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn empty_selector_returns_none() {
        let sel = Selector::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(sel.choose(&mut rng), None);
    }

    #[test]
    fn bucket_overflow_keeps_capacity() {
        let mut bucket = Bucket::default();
        for i in 0..(BUCKET_CAPACITY * 3) {
            bucket.insert(i as u64, i);
        }
        assert_eq!(bucket.entries.len(), BUCKET_CAPACITY);
        // Survivors should be the ones with the largest signal length.
        let min_len = bucket.entries.iter().map(|&(_, l)| l).min().unwrap();
        assert!(min_len >= BUCKET_CAPACITY * 3 - BUCKET_CAPACITY);
    }

    #[test]
    fn weighted_selection_balance_matches_s1() {
        // S1: A covers {100}, B covers {100, 200}, C covers {200}. Over
        // 100_000 draws expect roughly A=25k, B=50k, C=25k.
        let mut sel = Selector::new();
        let sig_a = Signal::from_raw(&[(100, 1)]);
        let sig_b = Signal::from_raw(&[(100, 1), (200, 1)]);
        let sig_c = Signal::from_raw(&[(200, 1)]);
        sel.insert(1, &sig_a);
        sel.insert(2, &sig_b);
        sel.insert(3, &sig_c);

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut counts = [0u32; 4];
        for _ in 0..100_000 {
            let hash = sel.choose(&mut rng).unwrap();
            counts[hash as usize] += 1;
        }
        let (a, b, c) = (counts[1], counts[2], counts[3]);
        assert!((20_000..30_000).contains(&a), "A count {a}");
        assert!((45_000..55_000).contains(&b), "B count {b}");
        assert!((20_000..30_000).contains(&c), "C count {c}");
    }

    #[test]
    fn probability_decreases_as_bucket_fills() {
        // A PC with a near-empty bucket should be selected more often than
        // one packed with unrelated programs, holding signal length equal.
        let mut sel = Selector::new();
        let rare_sig = Signal::from_raw(&[(1, 1)]);
        sel.insert(1, &rare_sig);
        let crowded_sig = Signal::from_raw(&[(2, 1)]);
        for h in 10..(10 + BUCKET_CAPACITY as u64) {
            sel.insert(h, &crowded_sig);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut rare_hits = 0u32;
        let mut crowded_hits = 0u32;
        for _ in 0..20_000 {
            match sel.choose(&mut rng) {
                Some(1) => rare_hits += 1,
                Some(h) if h >= 10 => crowded_hits += 1,
                _ => {}
            }
        }
        assert!(rare_hits > crowded_hits / (BUCKET_CAPACITY as u32));
    }
}
