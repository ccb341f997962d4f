//! S4: with a syscall whose estimated crash probability is pinned high,
//! the low-budget NextInput path must consume close to the maximum of 3
//! attempts per returned request rather than admitting freely, driven
//! against a real `Fuzzer` rather than the loop-level math in isolation.

use std::sync::Arc;

use fuzzer_core::{Call, ExecResult, Fuzzer, FuzzerConfig, Program, ProgInfo, Request, RequestFlags, Retryer, RetryerConfig, Status};

const RISKY_SYSCALL: u32 = 42;
const CALLS: usize = 300;

#[test]
fn budget_suppresses_acceptance_of_a_known_risky_syscall() {
    let (_candidates_tx, candidates_rx) = crossbeam_channel::unbounded();
    let fuzzer = Arc::new(Fuzzer::new(
        FuzzerConfig { coverage_enabled: false, fallback_syscalls: vec![RISKY_SYSCALL], ..Default::default() },
        candidates_rx,
    ));
    // `Fuzzer::new` already built the initial table from `fallback_syscalls`,
    // so `generate` emits RISKY_SYSCALL instead of Program::empty() from the
    // very first call.

    let retryer = Arc::new(Retryer::new(Arc::clone(&fuzzer), RetryerConfig::default()));

    // Seed the estimator: every recorded sample for RISKY_SYSCALL crashed.
    for i in 0..3 {
        let (req, _rx) =
            Request::new(Program::new(vec![Call::new(RISKY_SYSCALL, vec![])]), RequestFlags::default(), "seed", format!("seed{i}"));
        retryer.done(req, ExecResult { info: None, status: Status::Crashed });
    }

    for _ in 0..CALLS {
        let req = retryer.next_input(false).expect("fuzzer never runs dry in this test");
        retryer.done(req, ExecResult::ok(ProgInfo::default()));
    }

    // Every call to Retryer::next_input consumes between 1 and 3 underlying
    // Fuzzer::next_input calls, each one a completed "generate" request,
    // whether returned to the caller or rejected-and-dropped internally.
    // With crashProb pinned near 1.0 against a 0.001 budget, the accept
    // roll almost never succeeds before the 3rd-attempt fallback, so the
    // average should sit close to the maximum of 3.
    let total_attempts = fuzzer.stats.get("generate") as f64;
    let avg_attempts = total_attempts / CALLS as f64;
    assert!(avg_attempts > 2.5, "avg_attempts={avg_attempts}, expected budgeting to exhaust most attempts");
}
