//! Engine core: priority queues, corpus, choice table, job state machines
//! and the central scheduler (§4 of the design doc). Transport (RPC wire
//! types) and VM orchestration live in sibling crates; this crate has no
//! knowledge of either.

pub mod cancel;
pub mod choicetable;
pub mod corpus;
pub mod error;
pub mod fuzzer;
pub mod jobs;
pub mod pipeline;
pub mod prog;
pub mod queue;
pub mod retryer;
pub mod rng;
pub mod signal;
pub mod stats;

pub use cancel::CancelToken;
pub use choicetable::{RegenSteps, DEFAULT_REGEN_STEPS};
pub use corpus::Corpus;
pub use error::{Error, Result};
pub use fuzzer::{Fuzzer, FuzzerConfig};
pub use jobs::Job;
pub use pipeline::{CallInfo, ExecResult, ProgInfo, Request, RequestFlags, Status};
pub use prog::{Call, Program};
pub use retryer::{Retryer, RetryerConfig};
pub use signal::{Cover, Signal};
