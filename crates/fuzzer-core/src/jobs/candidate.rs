//! `candidate` job (§4.5): a program imported from the persistent corpus or
//! an external feed, submitted once with coverage collection enabled.

use std::sync::Arc;

use crate::fuzzer::{Fuzzer, JobOrigin, PRIO_CANDIDATE};
use crate::pipeline::RequestFlags;
use crate::prog::Program;

pub struct CandidateJob {
    program: Program,
    minimized: bool,
    smashed: bool,
}

impl CandidateJob {
    pub fn new(program: Program, minimized: bool, smashed: bool) -> Self {
        Self { program, minimized, smashed }
    }

    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        let flags = RequestFlags { need_signal: true, ..Default::default() };
        let origin = JobOrigin { from_candidate: true, pre_minimized: self.minimized, pre_smashed: self.smashed };
        fuzzer.exec_wait(PRIO_CANDIDATE, self.program, flags, "candidate", "candidate", origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::FuzzerConfig;
    use crate::jobs::Job;
    use crate::pipeline::{ExecResult, ProgInfo};
    use crate::prog::Call;
    use crossbeam_channel::unbounded;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn run_marks_the_request_as_originating_from_a_candidate() {
        let (_tx, rx) = unbounded();
        let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::default(), rx));
        let f2 = Arc::clone(&fuzzer);
        let handle = thread::spawn(move || loop {
            if let Some(req) = f2.next_exec.pop(i64::MIN) {
                assert!(req.from_candidate);
                f2.done(req, ExecResult::ok(ProgInfo::default()));
                return;
            }
            thread::sleep(Duration::from_millis(5));
        });
        let job = CandidateJob::new(Program::new(vec![Call::new(1, vec![])]), true, false);
        Job::Candidate(job).run(&fuzzer);
        handle.join().unwrap();
    }
}
