//! VM lease pool (§9: "model as a bounded channel of leases; reservations
//! restart the oldest instance"). The engine core never touches VM
//! mechanics directly — only this pool's lease/restart interface.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};

/// A handle to one pool slot, held exclusively by a worker loop for the
/// duration of one VM boot-run-shutdown cycle.
#[derive(Debug, Clone)]
pub struct VmSlot {
    pub id: usize,
    pub name: String,
}

/// Bounded channel of free leases plus bookkeeping for which slots are
/// currently checked out and since when, so `reserve_for_run` can pick the
/// longest-running instance to restart when no lease is immediately free.
pub struct VmPool {
    free_tx: Sender<VmSlot>,
    free_rx: Receiver<VmSlot>,
    total: usize,
    running_since: Mutex<HashMap<usize, Instant>>,
    restart_requested: Mutex<HashSet<usize>>,
}

impl VmPool {
    pub fn new(total: usize) -> Self {
        let (free_tx, free_rx) = bounded(total);
        for id in 0..total {
            free_tx.send(VmSlot { id, name: format!("vm-{id}") }).expect("pool channel has room for every slot");
        }
        Self { free_tx, free_rx, total, running_since: Mutex::new(HashMap::new()), restart_requested: Mutex::new(HashSet::new()) }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Block until a lease is free, then check it out.
    pub fn acquire(&self) -> VmSlot {
        let slot = self.free_rx.recv().expect("free_tx is never dropped while self is alive");
        self.running_since.lock().unwrap().insert(slot.id, Instant::now());
        self.restart_requested.lock().unwrap().remove(&slot.id);
        slot
    }

    /// Return a lease to the pool.
    pub fn release(&self, slot: VmSlot) {
        self.running_since.lock().unwrap().remove(&slot.id);
        let _ = self.free_tx.send(slot);
    }

    /// A running worker loop should check this periodically; if it returns
    /// true, the loop should finish its current request, shut the VM down
    /// and release the lease so `reserve_for_run` can make progress.
    pub fn should_restart(&self, id: usize) -> bool {
        self.restart_requested.lock().unwrap().contains(&id)
    }

    /// Steal up to `n` VMs for the reproducer manager: grab whatever
    /// leases are immediately free, and for the remainder, request a
    /// restart of the `n - free` longest-running instances so they return
    /// to the pool soon (§4.9: "Increasing the reservation restarts the
    /// longest-running instance").
    pub fn reserve_for_run(&self, n: usize) -> Vec<VmSlot> {
        let mut acquired = Vec::with_capacity(n);
        while acquired.len() < n {
            match self.free_rx.try_recv() {
                Ok(slot) => acquired.push(slot),
                Err(_) => break,
            }
        }
        let still_needed = n.saturating_sub(acquired.len());
        if still_needed > 0 {
            let running = self.running_since.lock().unwrap();
            let mut by_age: Vec<(usize, Instant)> = running.iter().map(|(&id, &t)| (id, t)).collect();
            by_age.sort_by_key(|&(_, t)| t);
            let mut requested = self.restart_requested.lock().unwrap();
            for (id, _) in by_age.into_iter().take(still_needed) {
                requested.insert(id);
            }
        }
        for slot in &acquired {
            self.running_since.lock().unwrap().insert(slot.id, Instant::now());
        }
        acquired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips_through_the_pool() {
        let pool = VmPool::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.id, b.id);
        pool.release(a);
        let c = pool.acquire();
        assert!(c.id == 0 || c.id == 1);
    }

    #[test]
    fn reserve_for_run_requests_restart_of_oldest_running_instance_when_pool_is_empty() {
        let pool = VmPool::new(1);
        let slot = pool.acquire();
        assert!(!pool.should_restart(slot.id));
        let reserved = pool.reserve_for_run(1);
        assert!(reserved.is_empty(), "no free lease, nothing acquired synchronously");
        assert!(pool.should_restart(slot.id));
    }

    #[test]
    fn reserve_for_run_prefers_already_free_leases() {
        let pool = VmPool::new(2);
        let reserved = pool.reserve_for_run(1);
        assert_eq!(reserved.len(), 1);
    }
}
