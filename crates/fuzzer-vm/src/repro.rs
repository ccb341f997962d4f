//! Reproducer manager (§4.9, §2 component (j)): queues crashes needing a
//! minimized reproducer, deduplicated by title, ordered manual > dashboard/
//! hub > normal, with a VM-count-capped pool sized off how many repros are
//! currently active.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use crate::crash::Crash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReproPriority {
    Normal,
    DashboardOrHub,
    Manual,
}

struct QueuedRepro {
    priority: ReproPriority,
    // Ties within a priority break FIFO: lower seq goes first, so we order
    // by Reverse(seq) inside the max-heap.
    seq: u64,
    dedup_key: String,
    crash: Crash,
}

impl PartialEq for QueuedRepro {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedRepro {}

impl PartialOrd for QueuedRepro {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRepro {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Crashes whose title is empty get a private, never-deduplicated key
/// instead of colliding on the empty string (resolved open question: see
/// DESIGN.md — synthetic titles do not share a repro slot, since pointer
/// identity carries no meaning once a crash has crossed the RPC boundary
/// and been serialized).
pub struct ReproManager {
    queue: Mutex<BinaryHeap<QueuedRepro>>,
    occupied_titles: Mutex<HashSet<String>>,
    next_seq: AtomicU64,
    next_synthetic: AtomicU64,
}

impl Default for ReproManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReproManager {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            occupied_titles: Mutex::new(HashSet::new()),
            next_seq: AtomicU64::new(0),
            next_synthetic: AtomicU64::new(0),
        }
    }

    /// Enqueue a crash for reproduction. Returns `false` (and drops the
    /// crash) if a repro for the same non-empty title is already queued or
    /// running.
    pub fn enqueue(&self, crash: Crash, priority: ReproPriority) -> bool {
        let dedup_key = if crash.title.trim().is_empty() {
            format!("__synthetic_{}", self.next_synthetic.fetch_add(1, AtomicOrdering::Relaxed))
        } else {
            crash.title.clone()
        };

        {
            let mut occupied = self.occupied_titles.lock().unwrap();
            if !occupied.insert(dedup_key.clone()) {
                return false;
            }
        }

        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.queue.lock().unwrap().push(QueuedRepro { priority, seq, dedup_key, crash });
        true
    }

    /// Pop the highest-priority queued crash, if any. The title stays
    /// marked occupied until `mark_done` is called, so a fresh crash with
    /// the same title arriving while a repro run is in flight is dropped
    /// rather than double-queued.
    pub fn pop_next(&self) -> Option<Crash> {
        self.queue.lock().unwrap().pop().map(|q| q.crash)
    }

    /// Release the title so a future crash under the same title can be
    /// queued again. Titles are recovered from the crash itself so callers
    /// don't need to thread the dedup key through a repro run.
    pub fn mark_done(&self, crash: &Crash) {
        // Synthetic keys are unique per-enqueue and never looked up again,
        // so only non-empty titles need releasing.
        if !crash.title.trim().is_empty() {
            self.occupied_titles.lock().unwrap().remove(&crash.title);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// `ResizeReproPool`: how many VMs the reproducer manager should hold,
    /// given how many repro runs are active right now, capped by the total
    /// pool size (§4.9: `ceil(4*activeRepros/3)` capped by total VMs).
    pub fn resize_repro_pool(active_repros: usize, total_vms: usize) -> usize {
        let wanted = (4 * active_repros).div_ceil(3);
        wanted.min(total_vms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crash(title: &str) -> Crash {
        Crash::new(title, vec![], vec![])
    }

    #[test]
    fn duplicate_non_empty_titles_are_deduplicated() {
        let mgr = ReproManager::new();
        assert!(mgr.enqueue(crash("panic in foo"), ReproPriority::Normal));
        assert!(!mgr.enqueue(crash("panic in foo"), ReproPriority::Manual));
        assert_eq!(mgr.queued_len(), 1);
    }

    #[test]
    fn empty_titles_never_collide_with_each_other() {
        let mgr = ReproManager::new();
        assert!(mgr.enqueue(crash(""), ReproPriority::Normal));
        assert!(mgr.enqueue(crash(""), ReproPriority::Normal));
        assert_eq!(mgr.queued_len(), 2);
    }

    #[test]
    fn mark_done_frees_the_title_for_requeue() {
        let mgr = ReproManager::new();
        assert!(mgr.enqueue(crash("panic in foo"), ReproPriority::Normal));
        let popped = mgr.pop_next().unwrap();
        assert!(!mgr.enqueue(crash("panic in foo"), ReproPriority::Normal));
        mgr.mark_done(&popped);
        assert!(mgr.enqueue(crash("panic in foo"), ReproPriority::Normal));
    }

    #[test]
    fn pop_next_orders_manual_before_dashboard_before_normal() {
        let mgr = ReproManager::new();
        mgr.enqueue(crash("a"), ReproPriority::Normal);
        mgr.enqueue(crash("b"), ReproPriority::DashboardOrHub);
        mgr.enqueue(crash("c"), ReproPriority::Manual);
        assert_eq!(mgr.pop_next().unwrap().title, "c");
        assert_eq!(mgr.pop_next().unwrap().title, "b");
        assert_eq!(mgr.pop_next().unwrap().title, "a");
    }

    #[test]
    fn equal_priority_breaks_ties_fifo() {
        let mgr = ReproManager::new();
        mgr.enqueue(crash("a"), ReproPriority::Normal);
        mgr.enqueue(crash("b"), ReproPriority::Normal);
        assert_eq!(mgr.pop_next().unwrap().title, "a");
        assert_eq!(mgr.pop_next().unwrap().title, "b");
    }

    #[test]
    fn resize_repro_pool_matches_the_formula_and_caps_at_total_vms() {
        assert_eq!(ReproManager::resize_repro_pool(3, 100), 4);
        assert_eq!(ReproManager::resize_repro_pool(0, 100), 0);
        assert_eq!(ReproManager::resize_repro_pool(30, 10), 10);
    }
}
