//! Request/Result pipeline (§4.4): typed execution requests, a one-shot
//! result channel per request, and the `Execute` helper jobs use to submit
//! a request and block for its result under cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::Rng;

use crate::cancel::CancelToken;
use crate::prog::{Comparison, Program};

/// A request's hard deadline (§7: "Result timeout (15 minutes, per
/// request) — panic with the serialized program; this is a bug in the
/// caller contract").
const RESULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFlags {
    pub need_signal: bool,
    pub need_cover: bool,
    pub need_raw_cover: bool,
    pub need_hints: bool,
    /// Set on a request the retryer already replayed from its deferred
    /// queue, so a second crash never re-defers it a second time (§4.8:
    /// "already-retried and no-retry requests are discarded instead").
    pub no_retry: bool,
}

/// Per-call feedback reported by the executor (§3: "Result — {ProgInfo
/// (per-call signal/cover/errno/hints)...}").
#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    /// Raw PCs this call exercised, not yet priority-stamped; triage turns
    /// this into a `Signal` via `Signal::from_raw_uniform` (§4.5 step 1).
    pub signal: Vec<u64>,
    pub cover: Vec<u64>,
    pub errno: i32,
    pub comparisons: Vec<Comparison>,
    /// Executor-reported per-call bitfield (§6: "callInfos[] with
    /// signal/cover/errno/flags/comps"). Bit meanings are a wire-level
    /// convention owned by the executor; the one the engine interprets is
    /// `CALL_FLAG_FAULT_NOT_REACHED`.
    pub flags: u32,
}

/// Set by the executor when a call's `fail_nth`-targeted fault injection
/// point was never reached, so `fault.rs` can tell "reached and survived"
/// apart from "never got that far" instead of guessing from an absent
/// `ProgInfo`.
pub const CALL_FLAG_FAULT_NOT_REACHED: u32 = 1 << 0;

impl CallInfo {
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty() && self.cover.is_empty() && self.comparisons.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgInfo {
    pub calls: Vec<CallInfo>,
    pub extra: Option<CallInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    ExecFailure,
    Crashed,
    Restarted,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub info: Option<ProgInfo>,
    pub status: Status,
}

impl ExecResult {
    pub fn ok(info: ProgInfo) -> Self {
        Self { info: Some(info), status: Status::Ok }
    }

    /// `stop=true iff status != ok` (§3).
    pub fn stop(&self) -> bool {
        self.status != Status::Ok
    }

    fn synthetic(status: Status) -> Self {
        Self { info: None, status }
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One outstanding execution request. Produced by a job, handed to an
/// `Executor`, resolved exactly once via the bundled result channel (§3
/// invariant: "Exactly one Result per Request").
pub struct Request {
    pub id: u64,
    pub program: Program,
    pub flags: RequestFlags,
    pub job_tag: String,
    pub stat_key: String,
    /// Set by a `candidate` job before submission so the triage gate can
    /// bump the resulting `TriageJob` to the candidate-triage priority
    /// tier and skip minimization if the candidate already claims it
    /// (§4.5 triage step 3, §9 priority ordering).
    pub from_candidate: bool,
    pub pre_minimized: bool,
    pub pre_smashed: bool,
    result_tx: Sender<ExecResult>,
}

impl Request {
    /// Build a request paired with the receiver its eventual result arrives
    /// on. The channel is bounded(1): exactly one send is ever expected.
    pub fn new(
        program: Program,
        flags: RequestFlags,
        job_tag: impl Into<String>,
        stat_key: impl Into<String>,
    ) -> (Self, Receiver<ExecResult>) {
        let (tx, rx) = bounded(1);
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        (
            Self {
                id,
                program,
                flags,
                job_tag: job_tag.into(),
                stat_key: stat_key.into(),
                from_candidate: false,
                pre_minimized: false,
                pre_smashed: false,
                result_tx: tx,
            },
            rx,
        )
    }

    /// Resolve this request. A second call is a programming error the spec
    /// forbids by construction (the sender is consumed), so we simply drop
    /// the result silently if the receiver is already gone.
    pub fn resolve(self, result: ExecResult) {
        let _ = self.result_tx.send(result);
    }
}

/// Producer side of the pipeline: submit a request for execution.
pub trait Executor: Send + Sync {
    fn submit(&self, req: Request);
}

/// Consumer side: pull the next request to execute, if any.
pub trait Source: Send + Sync {
    fn next(&self) -> Option<Request>;
}

/// Thread-safe FIFO implementing both `Executor` and `Source` (§4.4).
pub struct PlainQueue {
    items: Mutex<VecDeque<Request>>,
}

impl Default for PlainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainQueue {
    pub fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()) }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Executor for PlainQueue {
    fn submit(&self, req: Request) {
        self.items.lock().unwrap().push_back(req);
    }
}

impl Source for PlainQueue {
    fn next(&self) -> Option<Request> {
        self.items.lock().unwrap().pop_front()
    }
}

/// Tries each child source in order; the first one to yield a request
/// wins (§4.4: "Multiplexer source: list of child sources tried in order;
/// first non-empty wins").
pub struct Multiplexer {
    sources: Vec<Arc<dyn Source>>,
}

impl Multiplexer {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }
}

impl Source for Multiplexer {
    fn next(&self) -> Option<Request> {
        for source in &self.sources {
            if let Some(req) = source.next() {
                return Some(req);
            }
        }
        None
    }
}

/// Dilutes a source: returns empty with probability `p`, otherwise
/// delegates (§4.4: "used to dilute candidate streams").
pub struct Alternate<S> {
    inner: S,
    rng: Mutex<rand_chacha::ChaCha8Rng>,
    p: f64,
}

impl<S: Source> Alternate<S> {
    pub fn new(inner: S, rng: rand_chacha::ChaCha8Rng, p: f64) -> Self {
        Self { inner, rng: Mutex::new(rng), p }
    }
}

impl<S: Source> Source for Alternate<S> {
    fn next(&self) -> Option<Request> {
        let roll = self.rng.lock().unwrap().gen::<f64>();
        if roll < self.p {
            return None;
        }
        self.inner.next()
    }
}

/// LIFO chain of completion callbacks (§4.4: "OnDone(cb) — LIFO chain of
/// callbacks run on completion; any callback returning false
/// short-circuits the chain").
#[derive(Default)]
pub struct DoneChain {
    callbacks: Vec<Box<dyn Fn(&ExecResult) -> bool + Send>>,
}

impl DoneChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_done(&mut self, cb: impl Fn(&ExecResult) -> bool + Send + 'static) {
        self.callbacks.push(Box::new(cb));
    }

    pub fn run(&self, result: &ExecResult) {
        for cb in self.callbacks.iter().rev() {
            if !cb(result) {
                break;
            }
        }
    }
}

/// Submits `req` to `executor` and blocks for its result, observing
/// cancellation and the 15-minute hard deadline (§5 suspension points, §7
/// Result timeout).
pub fn execute(
    cancel: &CancelToken,
    executor: &dyn Executor,
    program: Program,
    flags: RequestFlags,
    job_tag: impl Into<String>,
    stat_key: impl Into<String>,
) -> ExecResult {
    let serialized_for_panic = program.serialize();
    let (req, rx) = Request::new(program, flags, job_tag, stat_key);
    executor.submit(req);
    let deadline = Instant::now() + RESULT_TIMEOUT;
    loop {
        if cancel.is_cancelled() {
            return ExecResult::synthetic(Status::ExecFailure);
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    panic!(
                        "request exceeded the 15 minute result deadline, program={:?}",
                        serialized_for_panic
                    );
                }
            }
            Err(RecvTimeoutError::Disconnected) => return ExecResult::synthetic(Status::ExecFailure),
        }
    }
}
