use thiserror::Error;

/// VM/executor-lifecycle error kinds (§7), the dispatcher-facing slice of
/// the same taxonomy `fuzzer_core::Error` and `fuzzer_rpc::RpcError` split
/// for their own boundaries.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("executor for instance `{instance}` was lost: {reason}")]
    ExecutorLost { instance: String, reason: String },

    #[error("executor exec failed ({attempts} attempts): {reason}")]
    ExecutorTransient { attempts: u32, reason: String },

    #[error("machine check failed {failures} times, aborting")]
    MachineCheckExhausted { failures: u32 },

    #[error("VM pool has no free slot to reserve")]
    PoolExhausted,
}

pub type Result<T> = std::result::Result<T, VmError>;
