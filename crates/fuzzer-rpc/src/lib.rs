//! Executor RPC (§6): wire envelopes, the PC canonicalizer, and the
//! newline-delimited-JSON transport that carries them between the
//! controller and its VM pool.

pub mod canon;
pub mod error;
pub mod transport;
pub mod wire;

pub use canon::Canonicalizer;
pub use error::{Result, RpcError};
pub use transport::{serve, Connection};
pub use wire::Envelope;
