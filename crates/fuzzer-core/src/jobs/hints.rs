//! `hints` job (§4.5): collect comparison operands from one execution, then
//! stream hint-guided mutants, stopping on the first result with
//! `stop=true`.

use std::sync::Arc;

use crate::fuzzer::{Fuzzer, JobOrigin, PRIO_SMASH};
use crate::pipeline::RequestFlags;
use crate::prog::Program;

pub struct HintsJob {
    program: Program,
}

impl HintsJob {
    pub fn new(program: Program) -> Self {
        Self { program }
    }

    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        let flags = RequestFlags { need_hints: true, ..Default::default() };
        let result =
            fuzzer.exec_wait(PRIO_SMASH, self.program.clone(), flags, "hints", "hints", JobOrigin::default());
        let Some(info) = result.info else { return };

        for (call_idx, call_info) in info.calls.iter().enumerate() {
            if call_info.comparisons.is_empty() {
                continue;
            }
            let mut stopped = false;
            self.program.mutate_with_hints(call_idx, &call_info.comparisons, |mutant| {
                let flags = RequestFlags { need_signal: true, ..Default::default() };
                let result = fuzzer.exec_wait(PRIO_SMASH, mutant, flags, "hints-mutant", "hints", JobOrigin::default());
                if result.stop() {
                    stopped = true;
                    return false;
                }
                true
            });
            if stopped {
                break;
            }
        }
    }
}
