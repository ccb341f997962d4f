//! The fuzzer core (§4.6): composes the priority queues, corpus, choice
//! table and RNG into the central `NextInput`/`genBetterJob`/`execWait`/
//! `Done` scheduling algorithm.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};

use crate::cancel::CancelToken;
use crate::choicetable::ChoiceTableProxy;
use crate::corpus::Corpus;
use crate::jobs::candidate::CandidateJob;
use crate::jobs::generate::GenerateJob;
use crate::jobs::smash::SmashJob;
use crate::jobs::triage::TriageJob;
use crate::jobs::Job;
use crate::pipeline::{CallInfo, ExecResult, Request, RequestFlags};
use crate::prog::Program;
use crate::queue::{Priority, PriorityQueue};
use crate::rng::SharedRng;
use crate::signal::Signal;
use crate::stats::Stats;

/// Priorities, smaller sorts lower (§4.5: "smash < generate < triage <
/// candidate < candidate-triage").
pub const PRIO_SMASH: Priority = 0;
pub const PRIO_GENERATE: Priority = 1;
pub const PRIO_TRIAGE: Priority = 2;
pub const PRIO_CANDIDATE: Priority = 3;
pub const PRIO_CANDIDATE_TRIAGE: Priority = 4;

/// Metadata a job attaches to a request so the Done-side triage gate can
/// tell where a result came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOrigin {
    pub from_candidate: bool,
    pub pre_minimized: bool,
    pub pre_smashed: bool,
}

pub struct FuzzerConfig {
    pub coverage_enabled: bool,
    pub fallback_syscalls: Vec<u32>,
    pub full_smash_n: usize,
    pub short_smash_n: usize,
    pub minimize_runs: usize,
    pub deflake_runs: usize,
    pub regen_steps: crate::choicetable::RegenSteps,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            coverage_enabled: true,
            fallback_syscalls: vec![0, 1, 2, 3],
            full_smash_n: 100,
            short_smash_n: 10,
            minimize_runs: 3,
            deflake_runs: 3,
            regen_steps: crate::choicetable::DEFAULT_REGEN_STEPS,
        }
    }
}

pub struct Fuzzer {
    pub(crate) next_exec: PriorityQueue<Request>,
    pub(crate) next_job: PriorityQueue<Job>,
    pub corpus: Corpus,
    pub choice_table: ChoiceTableProxy,
    pub rng: SharedRng,
    pub stats: Stats,
    pub cancel: CancelToken,
    candidates: Receiver<Program>,
    pub config: FuzzerConfig,
}

impl Fuzzer {
    pub fn new(config: FuzzerConfig, candidates: Receiver<Program>) -> Self {
        let choice_table = ChoiceTableProxy::with_regen_steps(config.fallback_syscalls.clone(), config.regen_steps);
        // Build the first snapshot from the fallback syscalls immediately:
        // otherwise `generate`/`smash` see no table at all until a program
        // has already been triaged into the corpus, and with an empty
        // initial program there is nothing to triage in the first place.
        choice_table.maybe_rebuild(&[]);
        Self {
            next_exec: PriorityQueue::new(),
            next_job: PriorityQueue::new(),
            corpus: Corpus::new(),
            choice_table,
            rng: SharedRng::new(0),
            stats: Stats::new(),
            cancel: CancelToken::new(),
            candidates,
            config,
        }
    }

    /// Push a request onto `nextExec`, wait for its result under
    /// cancellation and the 15-minute hard deadline (§4.6 execWait, §7).
    pub fn exec_wait(
        &self,
        priority: Priority,
        program: Program,
        flags: RequestFlags,
        job_tag: &str,
        stat_key: &str,
        origin: JobOrigin,
    ) -> ExecResult {
        let serialized_for_panic = program.serialize();
        let (mut req, rx) = Request::new(program, flags, job_tag.to_string(), stat_key.to_string());
        req.from_candidate = origin.from_candidate;
        req.pre_minimized = origin.pre_minimized;
        req.pre_smashed = origin.pre_smashed;
        self.next_exec.push(req, priority);
        let deadline = Instant::now() + Duration::from_secs(15 * 60);
        loop {
            if self.cancel.is_cancelled() {
                return ExecResult { info: None, status: crate::pipeline::Status::ExecFailure };
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(result) => return result,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        panic!(
                            "request exceeded the 15 minute result deadline, program={:?}",
                            serialized_for_panic
                        );
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return ExecResult { info: None, status: crate::pipeline::Status::ExecFailure };
                }
            }
        }
    }

    /// Enqueue a job for later scheduling by `genBetterJob`.
    pub fn queue_job(&self, job: Job, priority: Priority) {
        self.next_job.push(job, priority);
    }

    /// NextInput() — the central scheduler (§4.6, implemented exactly).
    /// Returns the request a VM dispatcher should execute next, spawning
    /// whatever job `genBetterJob` judged better than the request already
    /// at the front of the queue.
    pub fn next_input(self: &Arc<Self>) -> Option<Request> {
        let popped = self.next_exec.pop_with_priority(0);
        let floor = popped.as_ref().map(|(_, prio)| *prio).unwrap_or(0);
        if let Some((job, _prio)) = self.gen_better_job(floor) {
            let fz = Arc::clone(self);
            thread::Builder::new()
                .name("job-runner".to_string())
                .spawn(move || job.run(&fz))
                .expect("spawn job runner thread");
        }
        if let Some((req, _prio)) = popped {
            self.stats.increment("sent");
            return Some(req);
        }
        self.next_exec.pop_wait(&self.cancel)
    }

    /// genBetterJob(minPrio) (§4.6, implemented exactly).
    fn gen_better_job(self: &Arc<Self>, min_prio: Priority) -> Option<(Job, Priority)> {
        if let Some(job) = self.next_job.pop(min_prio.max(PRIO_CANDIDATE)) {
            let prio = job.priority();
            return Some((job, prio));
        }
        if min_prio < PRIO_CANDIDATE {
            match self.candidates.try_recv() {
                Ok(program) => {
                    let job = Job::Candidate(CandidateJob::new(program, false, false));
                    return Some((job, PRIO_CANDIDATE));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        if let Some(job) = self.next_job.pop(min_prio) {
            let prio = job.priority();
            return Some((job, prio));
        }
        if min_prio != 0 {
            return None;
        }
        let mutate_rate = if self.config.coverage_enabled { 0.95 } else { 0.5 };
        if self.rng.gen_f64() < mutate_rate {
            if let Some(program) = self.corpus.choose_program(&mut self.rng.fork()) {
                return Some((Job::Smash(SmashJob::new(program, true)), PRIO_SMASH));
            }
        }
        Some((Job::Generate(GenerateJob), PRIO_GENERATE))
    }

    /// Done(req, res) (§4.6): triage gate, stats, then resolve the waiter.
    pub fn done(&self, req: Request, result: ExecResult) {
        if req.flags.need_signal {
            if let Some(info) = &result.info {
                for (call_idx, call_info) in info.calls.iter().enumerate() {
                    self.triage_prog_call(
                        &req.program,
                        call_info,
                        Some(call_idx),
                        req.from_candidate,
                        req.pre_minimized,
                        req.pre_smashed,
                    );
                }
                if let Some(extra) = &info.extra {
                    self.triage_prog_call(&req.program, extra, None, req.from_candidate, req.pre_minimized, req.pre_smashed);
                }
            }
        }
        self.stats.increment(&req.stat_key);
        req.resolve(result);
    }

    /// triageProgCall (§4.6): enqueue a triageJob only if new max-signal
    /// was observed, implementing the "at most once per coverage point"
    /// invariant (§5).
    #[allow(clippy::too_many_arguments)]
    fn triage_prog_call(
        &self,
        program: &Program,
        call_info: &CallInfo,
        call_idx: Option<usize>,
        from_candidate: bool,
        pre_minimized: bool,
        pre_smashed: bool,
    ) {
        if call_info.is_empty() {
            return;
        }
        let prio = signal_prio(call_info);
        if !self
            .corpus
            .add_raw_max_signal(&call_info.signal.iter().map(|&pc| (pc, prio)).collect::<Vec<_>>())
        {
            return;
        }
        let job = TriageJob::new(program.clone(), call_idx, call_info.clone(), from_candidate, pre_minimized, pre_smashed);
        let priority = if from_candidate { PRIO_CANDIDATE_TRIAGE } else { PRIO_TRIAGE };
        self.queue_job(Job::Triage(job), priority);
    }
}

/// signalPrio (§4.5 triage): bit1 set if the call's errno is 0, bit0 set
/// if the call's syscall is not part of an "always-contained" baseline set
/// (here: the engine has no such set, so bit0 is always set — every call
/// is a candidate for bias, matching the degenerate case of an empty
/// always-contained set).
pub(crate) fn signal_prio(call_info: &CallInfo) -> u8 {
    let mut prio = 0u8;
    if call_info.errno == 0 {
        prio |= 0b10;
    }
    prio |= 0b01;
    prio
}
