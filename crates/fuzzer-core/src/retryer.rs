//! Retryer / crash estimator (§4.8): wraps the fuzzer core's `NextInput`/
//! `Done` to hold back requests whose program looks likely to crash the
//! VM, within a small risk budget.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::fuzzer::Fuzzer;
use crate::pipeline::{ExecResult, Request, Status};
use crate::prog::{Program, ProgHash};

const MIN_SAMPLES: usize = 3;
const MAX_ATTEMPTS: usize = 3;
const MAX_DEFERRED: usize = 10_000;

/// The "risky-program budget" config field (§2.1): acceptance thresholds
/// the retryer compares a program's estimated crash probability against.
#[derive(Debug, Clone, Copy)]
pub struct RetryerConfig {
    pub budget_normal: f64,
    pub budget_may_risk: f64,
}

impl Default for RetryerConfig {
    fn default() -> Self {
        Self { budget_normal: 0.001, budget_may_risk: 0.01 }
    }
}

#[derive(Default)]
struct SyscallStat {
    average: f64,
    count: usize,
}

/// Rolling per-syscall "caused a VM crash" average, 0 or 1 per sample,
/// with a minimum sample count before an estimate is trusted (§4.8).
#[derive(Default)]
struct CrashEstimator {
    per_syscall: Mutex<HashMap<u32, SyscallStat>>,
}

impl CrashEstimator {
    fn estimate(&self, program: &Program) -> f64 {
        let stats = self.per_syscall.lock().unwrap();
        program
            .calls
            .iter()
            .filter_map(|c| stats.get(&c.syscall_id))
            .filter(|s| s.count >= MIN_SAMPLES)
            .map(|s| s.average)
            .fold(0.0_f64, f64::max)
    }

    fn record(&self, program: &Program, crashed: bool) {
        let value = if crashed { 1.0 } else { 0.0 };
        let mut stats = self.per_syscall.lock().unwrap();
        for call in &program.calls {
            let entry = stats.entry(call.syscall_id).or_default();
            entry.average = (entry.average * entry.count as f64 + value) / (entry.count as f64 + 1.0);
            entry.count += 1;
        }
    }
}

/// Wraps `Fuzzer::next_input`/`Fuzzer::done` with crash-risk budgeting.
pub struct Retryer {
    fuzzer: Arc<Fuzzer>,
    config: RetryerConfig,
    estimator: CrashEstimator,
    deferred: Mutex<VecDeque<Program>>,
    retried: Mutex<HashSet<ProgHash>>,
}

impl Retryer {
    pub fn new(fuzzer: Arc<Fuzzer>, config: RetryerConfig) -> Self {
        Self {
            fuzzer,
            config,
            estimator: CrashEstimator::default(),
            deferred: Mutex::new(VecDeque::new()),
            retried: Mutex::new(HashSet::new()),
        }
    }

    /// NextInput policy (§4.8, implemented exactly): with `may_risk`, first
    /// drain a deferred risky request if one is queued; otherwise loop the
    /// inner fuzzer for candidates, accepting low-risk ones immediately,
    /// occasionally admitting riskier ones by budget/crashProb odds, and
    /// falling back to acceptance on the 3rd attempt to avoid an infinite
    /// loop (§9 open question: this fallback fires regardless of budget,
    /// by design).
    pub fn next_input(&self, may_risk: bool) -> Option<Request> {
        if may_risk {
            if let Some(program) = self.deferred.lock().unwrap().pop_front() {
                self.retried.lock().unwrap().insert(program.hash());
                let flags = crate::pipeline::RequestFlags { need_signal: true, no_retry: true, ..Default::default() };
                let (req, _rx) = Request::new(program, flags, "retry", "retry");
                return Some(req);
            }
        }

        let budget = if may_risk { self.config.budget_may_risk } else { self.config.budget_normal };
        for attempt in 1..=MAX_ATTEMPTS {
            let req = self.fuzzer.next_input()?;
            let crash_prob = self.estimator.estimate(&req.program);
            if crash_prob < budget {
                return Some(req);
            }
            let accept_prob = (budget / crash_prob).min(1.0);
            if self.fuzzer.rng.gen_f64() < accept_prob {
                return Some(req);
            }
            if attempt == MAX_ATTEMPTS {
                return Some(req);
            }
            self.done(req, ExecResult { info: None, status: Status::Crashed });
        }
        unreachable!("loop always returns or falls through to the fallback branch")
    }

    /// Done hook (§4.8): if the request actually crashed the VM, mark its
    /// calls unfavourable and defer it for a later risky retry, then
    /// forward to the inner fuzzer as usual. Already-retried and no-retry
    /// requests are discarded instead of re-deferred, so a risky retry
    /// never loops forever.
    pub fn done(&self, req: Request, result: ExecResult) {
        let crashed = result.status == Status::Crashed;
        self.estimator.record(&req.program, crashed);
        if crashed {
            let hash = req.program.hash();
            let already_retried = self.retried.lock().unwrap().contains(&hash);
            if !already_retried && !req.flags.no_retry {
                let mut deferred = self.deferred.lock().unwrap();
                if deferred.len() < MAX_DEFERRED {
                    deferred.push_back(req.program.clone());
                }
            }
        }
        self.fuzzer.done(req, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::FuzzerConfig;
    use crate::prog::Call;
    use crossbeam_channel::unbounded;

    fn prog_with_syscall(id: u32) -> Program {
        Program::new(vec![Call::new(id, vec![])])
    }

    #[test]
    fn estimate_ignores_syscalls_below_minimum_sample_count() {
        let estimator = CrashEstimator::default();
        estimator.record(&prog_with_syscall(1), true);
        estimator.record(&prog_with_syscall(1), true);
        assert_eq!(estimator.estimate(&prog_with_syscall(1)), 0.0);
        estimator.record(&prog_with_syscall(1), true);
        assert!(estimator.estimate(&prog_with_syscall(1)) > 0.9);
    }

    #[test]
    fn estimate_is_the_max_over_a_programs_calls() {
        let estimator = CrashEstimator::default();
        for _ in 0..3 {
            estimator.record(&prog_with_syscall(1), false);
        }
        for _ in 0..3 {
            estimator.record(&prog_with_syscall(2), true);
        }
        let risky = Program::new(vec![Call::new(1, vec![]), Call::new(2, vec![])]);
        assert!(estimator.estimate(&risky) > 0.9);
    }

    #[test]
    fn budget_acceptance_rate_matches_s4_within_a_run() {
        // S4: crashProb=0.10 for every program, MayRisk=false => budget
        // 0.001 => accept rate ~= 0.001/0.10 = 1% before the 3rd-attempt
        // fallback inflates it; assert the loop-level math in isolation
        // instead of driving a live Fuzzer (that's covered in fuzzer-vm's
        // integration tests).
        let budget = RetryerConfig::default().budget_normal;
        let crash_prob = 0.10_f64;
        let accept_prob = (budget / crash_prob).min(1.0);
        assert!((0.005..0.02).contains(&accept_prob));
    }

    #[test]
    fn deferred_queue_is_bounded() {
        let (_tx, rx) = unbounded();
        let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::default(), rx));
        let retryer = Retryer::new(fuzzer, RetryerConfig::default());
        for i in 0..(MAX_DEFERRED + 10) {
            let (req, _rx) = Request::new(
                Program::new(vec![Call::new(i as u32, vec![])]),
                Default::default(),
                "t",
                "k",
            );
            retryer.done(req, ExecResult { info: None, status: Status::Crashed });
        }
        assert_eq!(retryer.deferred.lock().unwrap().len(), MAX_DEFERRED);
    }
}
