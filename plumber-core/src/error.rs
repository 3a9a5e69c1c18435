//! Error kinds surfaced by the scheduler core (spec §7).

use thiserror::Error;

/// The crate-wide result alias. The library surface never leaks `anyhow::Error`;
/// callers that want to collapse everything into one opaque error can do that
/// themselves at their own boundary.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad pipe id, null handle, unknown module, or a programmer-error
    /// double operation (e.g. cancelling the same input slot twice).
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Out of memory or pool exhausted.
    #[error("allocation failed: {0}")]
    AllocFail(String),

    /// A module's own backend reported an error.
    #[error("module error: {0}")]
    ModuleError(String),

    /// Async read/write attempted while backpressured.
    #[error("would block")]
    WouldBlock,

    /// The pipe or task was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// Type inference could not resolve a convertibility equation.
    #[error("type error: {0}")]
    TypeError(String),

    /// Header size mismatch or malformed control opcode.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Operation attempted after the shutdown flag was set.
    #[error("shutdown in progress")]
    Shutdown,
}
