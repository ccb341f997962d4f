//! Generic bounded-memory priority queue (§4.1).
//!
//! Backed by `std::collections::BinaryHeap` behind a `Mutex` + `Condvar` —
//! the spec calls this out explicitly ("Priority queues: mutex + condition
//! variable", §5) rather than leaving the primitive unspecified.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::cancel::CancelToken;

pub type Priority = i64;

struct Entry<T> {
    priority: Priority,
    // Monotonic insertion sequence so that priority ties resolve the same
    // way every time within a run, rather than however the heap happens to
    // shuffle them (§4.1: "ties: arbitrary but stable within a run").
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| self.seq.cmp(&other.seq))
    }
}

struct State<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

/// A max-heap of `(item, priority)` pairs shared across threads.
pub struct PriorityQueue<T> {
    state: Mutex<State<T>>,
    cvar: Condvar,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { heap: BinaryHeap::new(), next_seq: 0 }),
            cvar: Condvar::new(),
        }
    }

    /// O(log n). Wakes one waiter if any is blocked in `pop_wait`.
    pub fn push(&self, item: T, priority: Priority) {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry { priority, seq, item });
        drop(state);
        self.cvar.notify_one();
    }

    /// O(1).
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking: returns the top item iff its priority is **strictly
    /// greater** than `min_prio`, else leaves the queue untouched.
    pub fn pop(&self, min_prio: Priority) -> Option<T> {
        self.pop_with_priority(min_prio).map(|(item, _)| item)
    }

    /// Same as `pop`, but also returns the priority the item was queued
    /// with — `NextInput` needs this to compute `genBetterJob`'s floor.
    pub fn pop_with_priority(&self, min_prio: Priority) -> Option<(T, Priority)> {
        let mut state = self.state.lock().unwrap();
        let top_is_better = matches!(state.heap.peek(), Some(e) if e.priority > min_prio);
        if top_is_better {
            state.heap.pop().map(|e| (e.item, e.priority))
        } else {
            None
        }
    }

    /// Blocks until an item is available (ignoring `min_prio`) or
    /// cancellation fires, then returns the highest-priority item.
    pub fn pop_wait(&self, cancel: &CancelToken) -> Option<T> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(entry) = guard.heap.pop() {
                return Some(entry.item);
            }
            if cancel.is_cancelled() {
                return None;
            }
            let (g, timeout) =
                self.cvar.wait_timeout(guard, Duration::from_millis(100)).unwrap();
            guard = g;
            let _ = timeout;
            if cancel.is_cancelled() && guard.heap.is_empty() {
                return None;
            }
        }
    }
}
