//! Wire envelopes for the executor RPC (§6): `Connect`, `Check`, `Exchange`,
//! plus the per-request/per-result payloads they carry. `Shutdown` has no
//! payload of its own — it is implied by connection loss (§6).

use serde::{Deserialize, Serialize};

/// One message on the wire, tagged so a single JSONL stream can carry the
/// whole exchange in either direction without a separate framing layer
/// per message kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    Connect(ConnectRequest),
    ConnectResp(ConnectResponse),
    Check(CheckRequest),
    CheckResp(CheckResponse),
    Exchange(ExchangeRequest),
    ExchangeResp(ExchangeResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub name: String,
    pub arch: String,
    pub modules: Vec<ModuleInfo>,
    pub machine_info: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub base_addr: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub enabled_syscalls: Vec<u32>,
    pub cover_filter_bitmap: Vec<u8>,
    pub bug_frames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub features: Vec<String>,
    pub disabled_calls: Vec<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub name: String,
    pub stats_delta: Vec<(String, u64)>,
    pub results: Vec<WireResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub requests: Vec<WireRequest>,
    pub new_max_signal: Vec<(u64, u8)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub program_bytes: Vec<u8>,
    pub need_cover: bool,
    pub need_signal: bool,
    pub need_hints: bool,
    pub signal_filter: Option<Vec<u64>>,
    pub filter_call: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResult {
    pub id: u64,
    pub call_infos: Vec<WireCallInfo>,
    pub extra: Option<WireCallInfo>,
    pub status: WireStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireCallInfo {
    pub signal: Vec<u64>,
    pub cover: Vec<u64>,
    pub errno: i32,
    pub flags: u32,
    pub comps: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireStatus {
    Ok,
    ExecFailure,
    Crashed,
    Restarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::Exchange(ExchangeRequest {
            name: "vm-0".into(),
            stats_delta: vec![("exec".into(), 3)],
            results: vec![WireResult {
                id: 1,
                call_infos: vec![WireCallInfo { signal: vec![7], ..Default::default() }],
                extra: None,
                status: WireStatus::Ok,
            }],
        });
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        match back {
            Envelope::Exchange(req) => assert_eq!(req.name, "vm-0"),
            _ => panic!("wrong variant"),
        }
    }
}
