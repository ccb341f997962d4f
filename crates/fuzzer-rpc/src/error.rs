use thiserror::Error;

/// RPC-boundary error kinds (§7 of the design doc, the executor-facing
/// slice of the same error taxonomy `fuzzer_core::Error` implements for
/// the scheduler-facing slice).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("malformed JSONL frame: {reason}")]
    Framing { reason: String },

    #[error("connection to executor `{name}` lost: {reason}")]
    ConnectionLost { name: String, reason: String },

    #[error("machine check failed: {reason}")]
    CheckFailed { reason: String },

    #[error("listener setup failed: {reason}")]
    Listen { reason: String },
}

pub type Result<T> = std::result::Result<T, RpcError>;
