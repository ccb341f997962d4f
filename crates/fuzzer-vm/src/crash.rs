//! Crash reports (§3, §6) and the consecutive-failure counters that gate
//! the controller's two abort conditions: Check (§6, 10 consecutive
//! failures) and machine check (§7, 10 failures).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::VmError;

/// `{title, output, machineInfo, fromRepro}` (§3). The engine never parses
/// `output`; it only carries it to the reproducer manager or drops it by
/// title (§6).
#[derive(Debug, Clone)]
pub struct Crash {
    pub title: String,
    pub output: Vec<u8>,
    pub machine_info: Vec<u8>,
    pub from_repro: bool,
}

impl Crash {
    pub fn new(title: impl Into<String>, output: Vec<u8>, machine_info: Vec<u8>) -> Self {
        Self { title: title.into(), output, machine_info, from_repro: false }
    }

    /// Prepend the request IDs a VM was last asked to run, per §4.9 step 5:
    /// "the last executed request IDs are captured and prepended to the
    /// kernel console log when building the crash report."
    pub fn with_last_request_ids(mut self, ids: &[u64]) -> Self {
        let mut prefix = format!("last request ids: {ids:?}\n").into_bytes();
        prefix.extend_from_slice(&self.output);
        self.output = prefix;
        self
    }
}

/// Counts consecutive failures of one kind and turns the Nth into an
/// error, resetting on any success. Shared by the Check handshake (10
/// failures, §6) and machine checks (10 failures, §7) — the two "abort
/// after N consecutive" conditions in the error design.
pub struct ConsecutiveFailureCounter {
    max: u32,
    count: AtomicU32,
}

impl ConsecutiveFailureCounter {
    pub fn new(max: u32) -> Self {
        Self { max, count: AtomicU32::new(0) }
    }

    pub fn succeed(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    /// Records one failure; returns `Err(MachineCheckExhausted)` once the
    /// running count reaches `max`. The counter does not reset itself on
    /// the triggering failure — callers that keep going after logging the
    /// error should call `succeed()` explicitly once things recover.
    pub fn fail(&self) -> Result<(), VmError> {
        let failures = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.max {
            return Err(VmError::MachineCheckExhausted { failures });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_with_last_request_ids_prepends_without_dropping_original_output() {
        let crash = Crash::new("title", b"oops".to_vec(), vec![]).with_last_request_ids(&[1, 2, 3]);
        let text = String::from_utf8(crash.output).unwrap();
        assert!(text.starts_with("last request ids: [1, 2, 3]\n"));
        assert!(text.ends_with("oops"));
    }

    #[test]
    fn counter_triggers_exactly_at_the_nth_consecutive_failure() {
        let counter = ConsecutiveFailureCounter::new(3);
        assert!(counter.fail().is_ok());
        assert!(counter.fail().is_ok());
        assert!(counter.fail().is_err());
    }

    #[test]
    fn success_resets_the_streak() {
        let counter = ConsecutiveFailureCounter::new(2);
        assert!(counter.fail().is_ok());
        counter.succeed();
        assert!(counter.fail().is_ok());
        assert!(counter.fail().is_err());
    }
}
