use thiserror::Error;

/// Error kinds surfaced by the engine core (§7 of the design doc).
///
/// The RPC- and VM-lifecycle error kinds (executor lost, exec transient,
/// machine check) belong to `fuzzer_rpc`/`fuzzer_vm`'s own boundary types;
/// the engine core's own fallible boundary is loading the on-disk corpus
/// database at startup (§6).
#[derive(Debug, Error)]
pub enum Error {
    #[error("corpus database at {path}: {reason}")]
    CorpusDeserialize { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
