//! `collide` job (§4.5): produce racy variants of a program and execute
//! each once without collecting signal.

use std::sync::Arc;

use rand::Rng;

use crate::fuzzer::{Fuzzer, JobOrigin, PRIO_SMASH};
use crate::pipeline::RequestFlags;
use crate::prog::{Call, Program};

const MAX_VARIANTS: usize = 15;

pub struct CollideJob {
    program: Program,
}

impl CollideJob {
    pub fn new(program: Program) -> Self {
        Self { program }
    }

    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        if self.program.is_empty() {
            return;
        }
        let mut rng = fuzzer.rng.fork();
        for _ in 0..MAX_VARIANTS {
            let variant = match rng.gen_range(0..3) {
                0 => double_execute(&self.program),
                1 => duplicate_random_call(&self.program, &mut rng),
                _ => mark_random_call_async(&self.program, &mut rng),
            };
            fuzzer.exec_wait(PRIO_SMASH, variant, RequestFlags::default(), "collide", "collide", JobOrigin::default());
        }
    }
}

/// Runs the whole program back to back in one request — collisions across
/// the two executions are what the executor's race detector is looking
/// for, not anything the engine core inspects itself.
fn double_execute(program: &Program) -> Program {
    let mut calls = program.calls.clone();
    calls.extend(program.calls.clone());
    Program::new(calls)
}

fn duplicate_random_call(program: &Program, rng: &mut impl Rng) -> Program {
    let idx = rng.gen_range(0..program.len());
    let mut calls = program.calls.clone();
    calls.insert(idx, program.calls[idx].clone());
    Program::new(calls)
}

/// Flags a random call as fire-and-forget by zeroing its fail_nth and
/// duplicating it immediately after itself, the simplest stand-in for an
/// "async" annotation the engine core's opaque `Call` has no dedicated bit
/// for (see DESIGN.md).
fn mark_random_call_async(program: &Program, rng: &mut impl Rng) -> Program {
    let idx = rng.gen_range(0..program.len());
    let mut calls = program.calls.clone();
    let mut flagged: Call = calls[idx].clone();
    flagged.fail_nth = 0;
    calls.insert(idx + 1, flagged);
    Program::new(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::FuzzerConfig;
    use crate::pipeline::{ExecResult, ProgInfo};
    use crossbeam_channel::unbounded;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn run_submits_at_most_fifteen_variants() {
        let (_tx, rx) = unbounded();
        let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::default(), rx));
        let f2 = Arc::clone(&fuzzer);
        let handle = thread::spawn(move || {
            let mut served = 0;
            while served < MAX_VARIANTS {
                if let Some(req) = f2.next_exec.pop(i64::MIN) {
                    assert!(!req.flags.need_signal);
                    f2.done(req, ExecResult::ok(ProgInfo::default()));
                    served += 1;
                } else {
                    thread::sleep(Duration::from_millis(5));
                }
            }
            served
        });
        CollideJob::new(Program::new(vec![Call::new(1, vec![])])).run(&fuzzer);
        assert_eq!(handle.join().unwrap(), MAX_VARIANTS);
    }
}
