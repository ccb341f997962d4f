//! `fault-injection` job (§4.5): probe how deep a call's fault-injection
//! points go by incrementing `fail_nth` until the executor reports the
//! fault point was never reached.

use std::sync::Arc;

use crate::fuzzer::{Fuzzer, JobOrigin, PRIO_SMASH};
use crate::pipeline::{RequestFlags, Status, CALL_FLAG_FAULT_NOT_REACHED};
use crate::prog::Program;

const MAX_NTH: u32 = 100;

pub struct FaultJob {
    program: Program,
    call_idx: usize,
}

impl FaultJob {
    pub fn new(program: Program, call_idx: usize) -> Self {
        Self { program, call_idx }
    }

    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        if self.program.calls.get(self.call_idx).is_none() {
            return;
        }
        for nth in 1..=MAX_NTH {
            let mut mutant = self.program.clone();
            let Some(call) = mutant.calls.get_mut(self.call_idx) else { return };
            call.fail_nth = nth;
            let flags = RequestFlags::default();
            let result = fuzzer.exec_wait(PRIO_SMASH, mutant, flags, "fault", "fault", JobOrigin::default());
            // A crashed/restarted result means the fault point was past
            // the call's effective depth; `ok`/`execFailure` both still
            // count as "reached" for this probe.
            if result.status == Status::Crashed || fault_not_reached(&result, self.call_idx) {
                break;
            }
        }
    }
}

/// The executor sets `CALL_FLAG_FAULT_NOT_REACHED` on a call's `CallInfo`
/// when `fail_nth` targeted a point the call never got to. A missing
/// `ProgInfo`, or a missing entry for `call_idx`, means the executor
/// couldn't report per-call info at all (e.g. `execFailure`) and is
/// treated the same way: stop probing rather than assume it was reached.
fn fault_not_reached(result: &crate::pipeline::ExecResult, call_idx: usize) -> bool {
    match result.info.as_ref().and_then(|info| info.calls.get(call_idx)) {
        Some(call) => call.flags & CALL_FLAG_FAULT_NOT_REACHED != 0,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::FuzzerConfig;
    use crate::pipeline::{CallInfo, ExecResult, ProgInfo};
    use crate::prog::Call;
    use crossbeam_channel::unbounded;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn stops_as_soon_as_fault_point_is_not_reached() {
        let (_tx, rx) = unbounded();
        let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::default(), rx));
        let f2 = Arc::clone(&fuzzer);
        let handle = thread::spawn(move || {
            let mut served = 0;
            loop {
                if let Some(req) = f2.next_exec.pop(i64::MIN) {
                    served += 1;
                    // Reached (flags=0) for the first two probes, not
                    // reached (flag set) on the third.
                    let flags = if served < 3 { 0 } else { CALL_FLAG_FAULT_NOT_REACHED };
                    let info = ProgInfo { calls: vec![CallInfo { flags, ..Default::default() }], extra: None };
                    f2.done(req, ExecResult { info: Some(info), status: crate::pipeline::Status::Ok });
                    if served >= 3 {
                        return served;
                    }
                } else {
                    thread::sleep(Duration::from_millis(5));
                }
            }
        });
        FaultJob::new(Program::new(vec![Call::new(1, vec![])]), 0).run(&fuzzer);
        let served = handle.join().unwrap();
        assert_eq!(served, 3);
    }

    #[test]
    fn missing_call_info_is_treated_as_not_reached() {
        let (_tx, rx) = unbounded();
        let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::default(), rx));
        let f2 = Arc::clone(&fuzzer);
        let handle = thread::spawn(move || {
            if let Some(req) = f2.next_exec.pop(i64::MIN) {
                f2.done(req, ExecResult { info: None, status: crate::pipeline::Status::Ok });
            }
        });
        FaultJob::new(Program::new(vec![Call::new(1, vec![])]), 0).run(&fuzzer);
        handle.join().unwrap();
    }
}
