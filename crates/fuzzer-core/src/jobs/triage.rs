//! `triage` job (§4.5): verify, deflake, minimize and admit a newly
//! observed coverage point into the corpus.

use std::sync::Arc;

use tracing::info;

use crate::fuzzer::{signal_prio, Fuzzer, JobOrigin, PRIO_TRIAGE};
use crate::jobs::smash::SmashJob;
use crate::jobs::Job;
use crate::pipeline::{CallInfo, ExecResult, RequestFlags};
use crate::prog::Program;
use crate::signal::{Cover, Signal};

pub struct TriageJob {
    program: Program,
    call_idx: Option<usize>,
    call_info: CallInfo,
    from_candidate: bool,
    pre_minimized: bool,
    pre_smashed: bool,
}

impl TriageJob {
    pub fn new(
        program: Program,
        call_idx: Option<usize>,
        call_info: CallInfo,
        from_candidate: bool,
        pre_minimized: bool,
        pre_smashed: bool,
    ) -> Self {
        Self { program, call_idx, call_info, from_candidate, pre_minimized, pre_smashed }
    }

    pub fn is_from_candidate(&self) -> bool {
        self.from_candidate
    }

    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        let prio = signal_prio(&self.call_info);
        let input_signal = Signal::from_raw_uniform(&self.call_info.signal, prio);

        let deflake_runs = fuzzer.config.deflake_runs;
        let mut stable = input_signal.clone();
        let mut input_cover = Cover::new();
        let mut raw_cover: Option<Cover> = None;
        let mut failures = 0usize;

        for _ in 0..deflake_runs {
            let flags = RequestFlags { need_signal: true, need_cover: true, ..Default::default() };
            let result = fuzzer.exec_wait(
                PRIO_TRIAGE,
                self.program.clone(),
                flags,
                "triage-deflake",
                "triage",
                JobOrigin::default(),
            );
            match self.run_outcome(&result) {
                Some((run_signal, run_cover)) => {
                    stable = stable.intersection(&run_signal);
                    input_cover.merge(&run_cover);
                    if raw_cover.is_none() {
                        raw_cover = Some(run_cover);
                    }
                }
                None => failures += 1,
            }
        }

        let abort_threshold = (deflake_runs + 1) / 2 + 1;
        if failures >= abort_threshold || stable.is_empty() {
            return;
        }

        let mut minimized = self.program.clone();
        if !self.pre_minimized {
            minimized = self.minimize(fuzzer, minimized, &stable);
        }

        let hash = minimized.hash();
        fuzzer.corpus.save(minimized.clone(), stable.clone(), hash);
        // The corpus only grows here, so this is the one place that needs to
        // ask whether the choice table is due for a rebuild (§4.7).
        fuzzer.choice_table.maybe_rebuild(&fuzzer.corpus.programs());

        if !self.pre_smashed {
            fuzzer.queue_job(Job::Smash(SmashJob::new(minimized.clone(), true)), crate::fuzzer::PRIO_SMASH);
        }

        info!(
            hash,
            stable_signal = stable.len(),
            merged_cover = input_cover.len(),
            raw_cover = raw_cover.map(|c| c.len()).unwrap_or(0),
            "triage admitted new corpus entry"
        );
    }

    /// A run "succeeds" iff info is non-empty and, if this triage concerns
    /// a specific call, that call's own info is non-empty and didn't
    /// transition from errno=0 to errno!=0 (§4.5 step 2).
    fn run_outcome(&self, result: &ExecResult) -> Option<(Signal, Cover)> {
        let info = result.info.as_ref()?;
        let call = match self.call_idx {
            Some(idx) => info.calls.get(idx)?,
            None => info.extra.as_ref()?,
        };
        if call.signal.is_empty() {
            return None;
        }
        if self.call_info.errno == 0 && call.errno != 0 {
            return None;
        }
        let prio = signal_prio(call);
        Some((Signal::from_raw_uniform(&call.signal, prio), Cover::from_pcs(call.cover.iter().copied())))
    }

    /// Greedy call-removal minimizer: drop one call at a time from the
    /// tail, keep the removal only if the resulting program still produces
    /// a signal that covers every PC in `stable` (§4.5 step 3).
    fn minimize(&self, fuzzer: &Arc<Fuzzer>, mut program: Program, stable: &Signal) -> Program {
        let mut idx = program.len();
        while idx > 0 {
            idx -= 1;
            if program.len() <= 1 {
                break;
            }
            let mut candidate = program.clone();
            candidate.calls.remove(idx);
            let mut preserves_stable = true;
            for _ in 0..fuzzer.config.minimize_runs {
                let flags = RequestFlags { need_signal: true, ..Default::default() };
                let result = fuzzer.exec_wait(
                    PRIO_TRIAGE,
                    candidate.clone(),
                    flags,
                    "triage-minimize",
                    "triage",
                    JobOrigin::default(),
                );
                if !self.covers_stable(&result, stable) {
                    preserves_stable = false;
                    break;
                }
            }
            if preserves_stable {
                program = candidate;
            }
        }
        program
    }

    fn covers_stable(&self, result: &ExecResult, stable: &Signal) -> bool {
        let Some(info) = &result.info else { return false };
        let mut observed = Signal::new();
        for call in &info.calls {
            observed.union_in_place(&Signal::from_raw_uniform(&call.signal, signal_prio(call)));
        }
        if let Some(extra) = &info.extra {
            observed.union_in_place(&Signal::from_raw_uniform(&extra.signal, signal_prio(extra)));
        }
        stable.iter().all(|(pc, _)| observed.contains(pc))
    }
}
