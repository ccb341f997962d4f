//! Per-VM worker loop (§4.9): owns one executor connection's RPC exchange
//! against the shared `Retryer`-wrapped scheduler, ships newly discovered
//! max-signal to every connected executor in bounded chunks, and turns a
//! lost connection or an abnormal exchange into a synchronous shutdown of
//! every in-flight request so the corresponding jobs unblock instead of
//! hanging forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fuzzer_core::pipeline::{CallInfo, ExecResult, ProgInfo, Request, Status};
use fuzzer_core::prog::Comparison;
use fuzzer_core::signal::Signal;
use fuzzer_core::Retryer;
use fuzzer_rpc::wire::{
    CheckResponse, ConnectResponse, Envelope, ExchangeResponse, WireCallInfo, WireRequest, WireResult, WireStatus,
};
use fuzzer_rpc::{Canonicalizer, Connection};
use tracing::{info, warn};

use crate::error::{Result, VmError};
use crate::pool::{VmPool, VmSlot};

/// The maximum number of syscall PCs the kernel's primary text module can
/// have wired through one exchange round before the dispatcher starts
/// trickling them in the next round instead (§4.9: `Split(150_000)`).
const SIGNAL_CHUNK: usize = 150_000;

/// How many requests a single `Exchange` round hands an executor. Capped
/// at 1: `Retryer::next_input` falls through to a blocking `popWait` once
/// the ready queue is drained, so looping past the first available
/// request risks stalling the whole `Exchange` reply on an empty queue
/// instead of returning promptly with what is already in hand.
const MAX_INFLIGHT_PER_ROUND: usize = 1;

/// Convention for where an executor's flat (non-multiplexed) PCs live: a
/// production executor reports per-module PCs, but the wire schema here
/// carries one flat PC list per call, so every PC is canonicalized against
/// this module name. A cluster with more than one instrumented module
/// would need a richer `WireCallInfo` (see DESIGN.md).
const PRIMARY_MODULE: &str = "vmlinux";

/// Accumulates globally-discovered max-signal for one connected executor
/// until the next exchange round drains (a bounded slice of) it.
#[derive(Default)]
struct SignalMailbox {
    pending: Mutex<Signal>,
}

impl SignalMailbox {
    fn push(&self, incoming: &Signal) {
        self.pending.lock().unwrap().union_in_place(incoming);
    }

    fn take_chunk(&self, n: usize) -> Signal {
        self.pending.lock().unwrap().split(n)
    }
}

/// Outcome of one VM's session ending, whether by clean shutdown request or
/// by losing the connection. `last_request_ids` seeds crash-report context:
/// whatever the VM was last asked to run is the likely culprit.
pub struct SessionOutcome {
    pub name: String,
    pub crashed: bool,
    pub last_request_ids: Vec<u64>,
}

/// Owns the shared retryer-wrapped scheduler and the per-executor signal
/// mailboxes; one `Dispatcher` serves an entire VM pool. Every VM requests
/// with `may_risk=false` — the reproducer manager's VMs are the ones
/// expected to ask for risky programs, not the main pool, since those
/// VMs are cheap to lose (see DESIGN.md).
pub struct Dispatcher {
    retryer: Arc<Retryer>,
    mailboxes: Mutex<HashMap<String, Arc<SignalMailbox>>>,
}

impl Dispatcher {
    pub fn new(retryer: Arc<Retryer>) -> Self {
        Self { retryer, mailboxes: Mutex::new(HashMap::new()) }
    }

    fn register(&self, name: &str) -> Arc<SignalMailbox> {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        mailboxes.entry(name.to_string()).or_insert_with(|| Arc::new(SignalMailbox::default())).clone()
    }

    fn unregister(&self, name: &str) {
        self.mailboxes.lock().unwrap().remove(name);
    }

    /// Called whenever the corpus accepts new max-signal, so it trickles out
    /// to every connected VM instead of requiring each one to poll it.
    pub fn broadcast_new_signal(&self, signal: &Signal) {
        if signal.is_empty() {
            return;
        }
        for mailbox in self.mailboxes.lock().unwrap().values() {
            mailbox.push(signal);
        }
    }

    /// Drive one executor connection to completion: the `Connect`/`Check`
    /// handshake, then `Exchange` rounds until the connection is lost or
    /// the pool asks this VM to restart. Runs on the thread `fuzzer_rpc`'s
    /// `serve` spawned for this connection.
    pub fn run_session(self: &Arc<Self>, conn: Connection, pool: &VmPool, slot: &VmSlot) -> Result<SessionOutcome> {
        let connect = match conn.inbox.recv() {
            Ok(Envelope::Connect(c)) => c,
            Ok(_) => return Err(VmError::ExecutorLost { instance: slot.name.clone(), reason: "expected Connect first".into() }),
            Err(_) => return Err(VmError::ExecutorLost { instance: slot.name.clone(), reason: "connection closed before Connect".into() }),
        };
        let canon = Canonicalizer::new(&connect.modules);
        conn.send(Envelope::ConnectResp(ConnectResponse {
            enabled_syscalls: Vec::new(),
            cover_filter_bitmap: Vec::new(),
            bug_frames: Vec::new(),
        }))
        .map_err(|e| VmError::ExecutorLost { instance: slot.name.clone(), reason: e.to_string() })?;

        let mailbox = self.register(&connect.name);
        let mut pending: HashMap<u64, Request> = HashMap::new();
        let mut last_request_ids: Vec<u64> = Vec::new();

        let outcome = loop {
            if pool.should_restart(slot.id) {
                info!(vm = %connect.name, "pool requested restart, closing session cleanly");
                break SessionOutcome { name: connect.name.clone(), crashed: false, last_request_ids: last_request_ids.clone() };
            }
            match conn.inbox.recv() {
                Ok(Envelope::Check(req)) => {
                    conn.send(Envelope::CheckResp(CheckResponse { ok: req.error.is_none() }))
                        .map_err(|e| VmError::ExecutorLost { instance: slot.name.clone(), reason: e.to_string() })?;
                    if req.error.is_some() {
                        warn!(vm = %connect.name, error = ?req.error, "executor reported a failed feature check");
                    }
                }
                Ok(Envelope::Exchange(exch)) => {
                    for wire_result in exch.results {
                        if let Some(req) = pending.remove(&wire_result.id) {
                            self.retryer.done(req, wire_result_to_exec(&wire_result, &canon));
                        }
                    }

                    let mut requests = Vec::with_capacity(MAX_INFLIGHT_PER_ROUND);
                    last_request_ids.clear();
                    while requests.len() < MAX_INFLIGHT_PER_ROUND {
                        match self.retryer.next_input(false) {
                            Some(req) => {
                                last_request_ids.push(req.id);
                                requests.push(to_wire_request(&req));
                                pending.insert(req.id, req);
                            }
                            None => break,
                        }
                    }

                    let new_max_signal = mailbox.take_chunk(SIGNAL_CHUNK).serialize();
                    conn.send(Envelope::ExchangeResp(ExchangeResponse { requests, new_max_signal }))
                        .map_err(|e| VmError::ExecutorLost { instance: slot.name.clone(), reason: e.to_string() })?;
                }
                Ok(other) => {
                    warn!(vm = %connect.name, envelope = ?other, "unexpected envelope outside handshake/exchange");
                }
                Err(_) => {
                    warn!(vm = %connect.name, "connection lost mid-session");
                    break SessionOutcome { name: connect.name.clone(), crashed: true, last_request_ids: last_request_ids.clone() };
                }
            }
        };

        self.shutdown_pending(pending);
        self.unregister(&connect.name);
        Ok(outcome)
    }

    /// Every request still awaiting a result when a VM goes away is
    /// resolved as crashed, through the retryer so stats/estimator state
    /// stay consistent, so its job unblocks instead of hanging on the 15
    /// minute result deadline (§4.9, §7).
    fn shutdown_pending(&self, pending: HashMap<u64, Request>) {
        for (_, req) in pending {
            self.retryer.done(req, ExecResult { info: None, status: Status::Crashed });
        }
    }
}

fn to_wire_request(req: &Request) -> WireRequest {
    WireRequest {
        id: req.id,
        program_bytes: req.program.serialize(),
        need_cover: req.flags.need_cover,
        need_signal: req.flags.need_signal,
        need_hints: req.flags.need_hints,
        signal_filter: None,
        filter_call: None,
    }
}

fn wire_result_to_exec(wire: &WireResult, canon: &Canonicalizer) -> ExecResult {
    let status = match wire.status {
        WireStatus::Ok => Status::Ok,
        WireStatus::ExecFailure => Status::ExecFailure,
        WireStatus::Crashed => Status::Crashed,
        WireStatus::Restarted => Status::Restarted,
    };
    if status != Status::Ok {
        return ExecResult { info: None, status };
    }
    let calls = wire.call_infos.iter().map(|c| wire_call_to_call_info(c, canon)).collect();
    let extra = wire.extra.as_ref().map(|c| wire_call_to_call_info(c, canon));
    ExecResult { info: Some(ProgInfo { calls, extra }), status }
}

fn wire_call_to_call_info(wire: &WireCallInfo, canon: &Canonicalizer) -> CallInfo {
    let canonicalize_all = |pcs: &[u64]| -> Vec<u64> {
        pcs.iter().filter_map(|&pc| canon.canonicalize(PRIMARY_MODULE, pc).or(Some(pc))).collect()
    };
    let comparisons = wire
        .comps
        .iter()
        .map(|(observed, suggested)| Comparison { observed: observed.clone(), suggested: suggested.clone() })
        .collect();
    CallInfo {
        signal: canonicalize_all(&wire.signal),
        cover: canonicalize_all(&wire.cover),
        errno: wire.errno,
        comparisons,
        flags: wire.flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzer_core::{Fuzzer, FuzzerConfig, RetryerConfig};
    use fuzzer_rpc::wire::ExchangeRequest;
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::time::Duration;

    fn modules() -> Vec<fuzzer_rpc::wire::ModuleInfo> {
        vec![fuzzer_rpc::wire::ModuleInfo { name: PRIMARY_MODULE.into(), base_addr: 0 }]
    }

    #[test]
    fn signal_mailbox_chunks_and_drains_in_order() {
        let mailbox = SignalMailbox::default();
        mailbox.push(&Signal::from_raw(&[(1, 1), (2, 1), (3, 1)]));
        let first = mailbox.take_chunk(2);
        assert_eq!(first.len(), 2);
        let second = mailbox.take_chunk(2);
        assert_eq!(second.len(), 1);
        assert!(mailbox.take_chunk(2).is_empty());
    }

    #[test]
    fn run_session_shuts_down_pending_requests_when_connection_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conn_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = fuzzer_rpc::serve(listener, move |conn| {
                let _ = conn_tx.send(conn);
            });
        });

        let mut client = TcpStream::connect(addr).unwrap();
        use std::io::Write;
        let connect = Envelope::Connect(fuzzer_rpc::wire::ConnectRequest {
            name: "vm-test".into(),
            arch: "amd64".into(),
            modules: modules(),
            machine_info: vec![],
        });
        writeln!(client, "{}", serde_json::to_string(&connect).unwrap()).unwrap();
        let exchange = Envelope::Exchange(ExchangeRequest { name: "vm-test".into(), stats_delta: vec![], results: vec![] });
        writeln!(client, "{}", serde_json::to_string(&exchange).unwrap()).unwrap();
        drop(client);

        let conn = conn_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let (_candidates_tx, candidates_rx) = crossbeam_channel::unbounded();
        let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::default(), candidates_rx));
        let retryer = Arc::new(Retryer::new(fuzzer, RetryerConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(retryer));
        let pool = VmPool::new(1);
        let slot = VmSlot { id: 0, name: "vm-test".into() };
        let outcome = dispatcher.run_session(conn, &pool, &slot).unwrap();
        assert!(outcome.crashed);
    }
}
