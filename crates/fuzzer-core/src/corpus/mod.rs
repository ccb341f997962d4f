//! The corpus: every admitted program plus the aggregated max-signal the
//! engine has ever observed (§3, §4.3). Guarded by a single `RwLock`
//! (§5: "Corpus: internal RW-mutex; writers serialized").

pub mod db;
mod selector;

use std::path::Path;
use std::sync::RwLock;

use rand::Rng;

use crate::prog::{Program, ProgHash};
use crate::signal::Signal;
use db::{DbRecord, CORPUS_DB_VERSION};
use selector::Selector;

struct Entry {
    program: Program,
    signal: Signal,
}

struct State {
    entries: std::collections::HashMap<ProgHash, Entry>,
    order: Vec<ProgHash>,
    max_signal: Signal,
    selector: Selector,
}

/// Holds every admitted program and the engine-wide max-signal. Readers
/// (stat queries, `Programs`) take the read side of the lock; `Save` and
/// `AddRawMaxSignal` take the write side. The invariant the lock protects:
/// max-signal is always a superset of every entry's own signal, and the
/// selector has seen every entry exactly once (§5).
pub struct Corpus {
    state: RwLock<State>,
}

impl Default for Corpus {
    fn default() -> Self {
        Self::new()
    }
}

impl Corpus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                entries: std::collections::HashMap::new(),
                order: Vec::new(),
                max_signal: Signal::new(),
                selector: Selector::new(),
            }),
        }
    }

    /// Idempotent on `hash`: re-saving an already-known program is a no-op
    /// other than folding its signal into max-signal (§4.3: "Save(program,
    /// signal, hash) — idempotent on hash").
    pub fn save(&self, program: Program, signal: Signal, hash: ProgHash) {
        let mut state = self.state.write().unwrap();
        state.max_signal.union_in_place(&signal);
        if state.entries.contains_key(&hash) {
            return;
        }
        state.selector.insert(hash, &signal);
        state.order.push(hash);
        state.entries.insert(hash, Entry { program, signal });
    }

    /// PCs in `signal` not already present in max-signal (§4.3:
    /// "SignalDiff(s) — PCs in s not already in max-signal").
    pub fn signal_diff(&self, signal: &Signal) -> Signal {
        let state = self.state.read().unwrap();
        signal.diff(&state.max_signal)
    }

    /// Folds raw PCs straight into max-signal without creating a corpus
    /// entry, used for coverage observed outside any single saved program.
    /// Returns true iff anything was new (§4.3: "AddRawMaxSignal(pcs, prio)
    /// — expands max-signal; returns true iff anything was new"), which is
    /// what the triage gate uses to enforce "at most once per coverage
    /// point" (§5).
    pub fn add_raw_max_signal(&self, pcs: &[(u64, u8)]) -> bool {
        let mut state = self.state.write().unwrap();
        let mut any_new = false;
        for &(pc, prio) in pcs {
            if !state.max_signal.contains(pc) {
                any_new = true;
            }
            state.max_signal.insert(pc, prio);
        }
        any_new
    }

    /// Bias-pick a program hash; `None` on an empty corpus (§4.3: "Empty
    /// corpus ⇒ ChooseProgram returns none").
    pub fn choose_program<R: Rng>(&self, rng: &mut R) -> Option<Program> {
        let state = self.state.read().unwrap();
        let hash = state.selector.choose(rng)?;
        state.entries.get(&hash).map(|e| e.program.clone())
    }

    /// Every program currently held, in admission order (§4.3: "Programs()").
    pub fn programs(&self) -> Vec<Program> {
        let state = self.state.read().unwrap();
        state.order.iter().filter_map(|h| state.entries.get(h).map(|e| e.program.clone())).collect()
    }

    pub fn stat_progs(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    pub fn stat_signal(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .entries
            .values()
            .map(|e| e.signal.len())
            .sum()
    }

    pub fn stat_max_signal(&self) -> usize {
        self.state.read().unwrap().max_signal.len()
    }

    /// Rewrite the persistent corpus database at `path` from the current
    /// entries (§6: "Source corpus DB (on disk)"). Called periodically from
    /// the controller binary, not on every `save` — the write cost scales
    /// with corpus size since this is a full rewrite, not an append.
    pub fn save_to_disk(&self, path: &Path) -> std::io::Result<()> {
        let state = self.state.read().unwrap();
        let records: Vec<DbRecord> = state
            .order
            .iter()
            .filter_map(|hash| {
                state.entries.get(hash).map(|entry| DbRecord {
                    version: CORPUS_DB_VERSION,
                    hash: *hash,
                    program: entry.program.clone(),
                    signal: entry.signal.serialize(),
                })
            })
            .collect();
        db::save_records(path, &records)
    }
}
