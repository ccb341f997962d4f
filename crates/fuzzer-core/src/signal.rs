//! Coverage feedback: `Signal` (PC → priority, §3/§4.2) and `Cover` (raw PCs
//! from a single call, §3).

use std::collections::{HashMap, HashSet};

/// A PC paired with the priority it was observed at. This is the flat
/// on-wire representation `Signal::serialize`/`Signal::from_raw` convert
/// to and from.
pub type RawSignal = Vec<(u64, u8)>;

/// Coverage feedback: a set of program counters, each carrying the maximum
/// priority ever observed for it (§3 invariant: "a key appears at most
/// once; its priority is the max ever observed").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signal {
    pcs: HashMap<u64, u8>,
}

impl Signal {
    pub fn new() -> Self {
        Self { pcs: HashMap::new() }
    }

    /// Build from a raw (possibly-duplicated, possibly out of priority
    /// order) list of (pc, prio) pairs, collapsing to the max priority per
    /// pc — this is `FromRaw` in the design doc.
    pub fn from_raw(raw: &[(u64, u8)]) -> Self {
        let mut pcs = HashMap::with_capacity(raw.len());
        for &(pc, prio) in raw {
            pcs.entry(pc)
                .and_modify(|p: &mut u8| *p = (*p).max(prio))
                .or_insert(prio);
        }
        Self { pcs }
    }

    /// Build from a flat list of PCs (no per-element priority, as reported
    /// by an executor's raw call coverage) plus one priority applied
    /// uniformly — this is the two-argument `FromRaw(pcs, prio)` used by
    /// triage to stamp a freshly observed call's coverage (§4.5 step 1).
    pub fn from_raw_uniform(pcs: &[u64], prio: u8) -> Self {
        let mut map = HashMap::with_capacity(pcs.len());
        for &pc in pcs {
            map.insert(pc, prio);
        }
        Self { pcs: map }
    }

    pub fn serialize(&self) -> RawSignal {
        let mut out: Vec<(u64, u8)> = self.pcs.iter().map(|(&pc, &prio)| (pc, prio)).collect();
        out.sort_unstable_by_key(|&(pc, _)| pc);
        out
    }

    pub fn len(&self) -> usize {
        self.pcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcs.is_empty()
    }

    pub fn contains(&self, pc: u64) -> bool {
        self.pcs.contains_key(&pc)
    }

    pub fn priority_of(&self, pc: u64) -> Option<u8> {
        self.pcs.get(&pc).copied()
    }

    pub fn insert(&mut self, pc: u64, prio: u8) {
        self.pcs
            .entry(pc)
            .and_modify(|p: &mut u8| *p = (*p).max(prio))
            .or_insert(prio);
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u8)> + '_ {
        self.pcs.iter().map(|(&pc, &prio)| (pc, prio))
    }

    /// Union: merge `other` into a new signal, keeping the max priority for
    /// PCs present in both.
    pub fn union(&self, other: &Signal) -> Signal {
        let mut out = self.clone();
        for (pc, prio) in other.iter() {
            out.insert(pc, prio);
        }
        out
    }

    pub fn union_in_place(&mut self, other: &Signal) {
        for (pc, prio) in other.iter() {
            self.insert(pc, prio);
        }
    }

    /// Intersection: PCs present in both, keeping the max priority seen
    /// between the two sides.
    pub fn intersection(&self, other: &Signal) -> Signal {
        let mut out = Signal::new();
        for (&pc, &prio) in &self.pcs {
            if let Some(&other_prio) = other.pcs.get(&pc) {
                out.insert(pc, prio.max(other_prio));
            }
        }
        out
    }

    /// Elements of `self` whose PC is not present in `other`.
    pub fn diff(&self, other: &Signal) -> Signal {
        let mut out = Signal::new();
        for (&pc, &prio) in &self.pcs {
            if !other.pcs.contains_key(&pc) {
                out.insert(pc, prio);
            }
        }
        out
    }

    /// Remove and return up to `n` elements from `self`, used to trickle new
    /// max-signal to workers in bounded chunks (§4.9: `Split(150_000)`).
    pub fn split(&mut self, n: usize) -> Signal {
        let mut taken = Signal::new();
        let keys: Vec<u64> = self.pcs.keys().take(n).copied().collect();
        for pc in keys {
            if let Some(prio) = self.pcs.remove(&pc) {
                taken.insert(pc, prio);
            }
        }
        taken
    }
}

/// Raw PCs executed by the most recent run of one call (§3). Merge is plain
/// set union; no priorities are tracked at this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cover {
    pcs: HashSet<u64>,
}

impl Cover {
    pub fn new() -> Self {
        Self { pcs: HashSet::new() }
    }

    pub fn from_pcs(pcs: impl IntoIterator<Item = u64>) -> Self {
        Self { pcs: pcs.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.pcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcs.is_empty()
    }

    pub fn merge(&mut self, other: &Cover) {
        self.pcs.extend(other.pcs.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.pcs.iter().copied()
    }

    pub fn as_sorted_vec(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.pcs.iter().copied().collect();
        v.sort_unstable();
        v
    }
}
