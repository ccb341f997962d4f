use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A cloneable cancellation signal, the Rust stand-in for the context tree
/// that §5 roots at the controller. Every blocking primitive in this crate
/// (priority queue waits, result awaits) takes one of these and races it
/// against whatever it would otherwise block on.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                cvar: Condvar::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the whole tree. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let _guard = self.inner.lock.lock().unwrap();
        self.inner.cvar.notify_all();
    }

    /// Block until cancelled or `timeout` elapses. Returns `true` if
    /// cancellation was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let guard = self.inner.lock.lock().unwrap();
        let deadline = Instant::now() + timeout;
        let mut guard = guard;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, result) = self.inner.cvar.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            if result.timed_out() {
                return self.is_cancelled();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_wakes_waiters() {
        let tok = CancelToken::new();
        let waiter = tok.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        tok.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_timeout_without_cancel_returns_false() {
        let tok = CancelToken::new();
        assert!(!tok.wait_timeout(Duration::from_millis(20)));
    }
}
