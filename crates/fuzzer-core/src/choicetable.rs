//! Syscall selection bias table, rebuilt periodically from the corpus
//! (§4.7). Readers dereference an `ArcSwap` snapshot without locking;
//! rebuilds are serialized by a mutex so only one thread pays the O(n)
//! rebuild cost at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use rand::Rng;

use crate::prog::Program;

/// A uniform (or corpus-biased) table of syscalls eligible for generation.
/// Keeping it a flat `Vec` with repeated entries is the simplest way to bias
/// selection: a syscall observed in more corpus calls gets more slots.
pub struct ChoiceTable {
    weighted: Vec<u32>,
}

impl ChoiceTable {
    pub fn uniform(syscalls: &[u32]) -> Self {
        Self { weighted: syscalls.to_vec() }
    }

    /// Build from the current corpus: every call's syscall id gets one
    /// slot, so syscalls already exercised more often in the corpus are
    /// chosen more often for new calls inserted during mutation — this is
    /// the "biased syscall-selection table derived from the current
    /// corpus" the glossary describes.
    pub fn from_corpus(programs: &[Program], fallback: &[u32]) -> Self {
        let mut weighted: Vec<u32> = programs.iter().flat_map(|p| p.calls.iter().map(|c| c.syscall_id)).collect();
        if weighted.is_empty() {
            weighted = fallback.to_vec();
        }
        Self { weighted }
    }

    pub fn choose<R: Rng>(&self, rng: &mut R) -> u32 {
        if self.weighted.is_empty() {
            return 0;
        }
        self.weighted[rng.gen_range(0..self.weighted.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.weighted.is_empty()
    }
}

/// Corpus-size tier boundaries `(10, 100, 1000)` paired with the step size
/// for each tier `(5, 33, 250, 500)` (§4.7). Exposed as data rather than a
/// hardcoded function so the "choice table regeneration steps" config
/// field (§2.1) can override it in tests without faking corpus growth.
pub const DEFAULT_REGEN_STEPS: RegenSteps = RegenSteps { tier_bounds: [10, 100, 1000], steps: [5, 33, 250, 500] };

#[derive(Debug, Clone, Copy)]
pub struct RegenSteps {
    tier_bounds: [usize; 3],
    steps: [usize; 4],
}

impl RegenSteps {
    pub fn new(tier_bounds: [usize; 3], steps: [usize; 4]) -> Self {
        Self { tier_bounds, steps }
    }

    fn step_for(&self, corpus_len: usize) -> usize {
        for (i, &bound) in self.tier_bounds.iter().enumerate() {
            if corpus_len <= bound {
                return self.steps[i];
            }
        }
        self.steps[3]
    }
}

/// The rebuildable proxy the fuzzer core holds: `choice_table()` always
/// returns instantly from the atomic snapshot; `maybe_rebuild` is the only
/// place that takes the rebuild mutex.
pub struct ChoiceTableProxy {
    current: ArcSwap<Option<ChoiceTable>>,
    last_build_len: AtomicUsize,
    rebuild_lock: Mutex<()>,
    fallback_syscalls: Vec<u32>,
    regen_steps: RegenSteps,
}

impl ChoiceTableProxy {
    pub fn new(fallback_syscalls: Vec<u32>) -> Self {
        Self::with_regen_steps(fallback_syscalls, DEFAULT_REGEN_STEPS)
    }

    pub fn with_regen_steps(fallback_syscalls: Vec<u32>, regen_steps: RegenSteps) -> Self {
        Self {
            current: ArcSwap::from_pointee(None),
            last_build_len: AtomicUsize::new(0),
            rebuild_lock: Mutex::new(()),
            fallback_syscalls,
            regen_steps,
        }
    }

    /// Rebuild iff there is no table yet or the corpus has grown by at least
    /// `regen_steps.step_for(last_build_len)` since the last build (§4.7).
    /// Returns `true` iff a rebuild happened this call.
    pub fn maybe_rebuild(&self, programs: &[Program]) -> bool {
        let have_table = self.current.load().is_some();
        let last_len = self.last_build_len.load(Ordering::Acquire);
        let grew_enough = programs.len() >= last_len + self.regen_steps.step_for(last_len);
        if have_table && !grew_enough {
            return false;
        }
        let _guard = self.rebuild_lock.lock().unwrap();
        // Re-check under the lock: another thread may have just rebuilt.
        let have_table = self.current.load().is_some();
        let last_len = self.last_build_len.load(Ordering::Acquire);
        let grew_enough = programs.len() >= last_len + self.regen_steps.step_for(last_len);
        if have_table && !grew_enough {
            return false;
        }
        let table = ChoiceTable::from_corpus(programs, &self.fallback_syscalls);
        self.current.store(Arc::new(Some(table)));
        self.last_build_len.store(programs.len(), Ordering::Release);
        true
    }

    /// Lock-free read of the current snapshot.
    pub fn current(&self) -> Arc<Option<ChoiceTable>> {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prog::Call;

    fn progs(n: usize) -> Vec<Program> {
        (0..n).map(|i| Program::new(vec![Call::new(i as u32, vec![])])).collect()
    }

    #[test]
    fn rebuild_triggers_exactly_at_thresholds() {
        // S6: inserting 5, 10, 50, 250, 500 programs successively must
        // trigger exactly 5 rebuilds (at 5, 11->33-step, 33, 250, 500).
        let proxy = ChoiceTableProxy::new(vec![1]);
        let counts = [5usize, 10, 50, 250, 500];
        let mut rebuilds = 0;
        let mut corpus: Vec<Program> = Vec::new();
        let mut last_count = 0usize;
        for &target in &counts {
            corpus.extend(progs(target - last_count));
            last_count = target;
            if proxy.maybe_rebuild(&corpus) {
                rebuilds += 1;
            }
        }
        assert_eq!(rebuilds, 5);
    }

    #[test]
    fn no_table_forces_first_rebuild_even_with_empty_corpus() {
        let proxy = ChoiceTableProxy::new(vec![1, 2]);
        assert!(proxy.maybe_rebuild(&[]));
        assert!(!proxy.maybe_rebuild(&[]));
    }

    #[test]
    fn choose_returns_only_known_syscalls() {
        let table = ChoiceTable::from_corpus(&progs(4), &[]);
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let id = table.choose(&mut rng);
            assert!(id < 4);
        }
    }
}
