//! Error taxonomy for the task/promise/coroutine machinery.
//!
//! Cancellation is deliberately *not* a variant here: a canceled task carries no payload and
//! is observed through [`crate::task::TaskState::Canceled`], never through this type.

use std::fmt;

/// A boxed, type-erased operation failure.
///
/// Child operations can fail with whatever error type makes sense to them; the task/promise
/// machinery only needs to move the failure around and hand it back to the consumer.
pub type BoxError = Box<dyn std::error::Error + Send + 'static>;

/// Errors surfaced by the core task/promise/coroutine machinery.
#[derive(thiserror::Error)]
pub enum Error {
    /// The underlying operation failed; carries the operation's own error.
    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),

    /// A fallible allocator could not provide storage for a long-lived async object.
    #[error("allocation failed")]
    Allocation,

    /// A stack-preserving coroutine is being torn down and must unwind to completion.
    ///
    /// Swallowing this without propagating it to the end of the coroutine body is a contract
    /// violation (checked at resume time, see `coroutine::stackful`).
    #[error("coroutine is being force-unwound")]
    ForcedUnwind,

    /// Misuse of the API: double take, awaiting an invalid awaitable, depth overflow, etc.
    ///
    /// This crate does not distinguish a "debug-only checked" build from a release one; a
    /// contract violation always panics (see `ut_dcheck` in the source this was ported from,
    /// which aborts in both modes once `UT_CHECK_GENERIC` is enabled).
    #[error("contract violation: {0}")]
    ContractViolation(&'static str),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Defer to Display; the variants carry no internal state worth exposing twice.
        fmt::Display::fmt(self, f)
    }
}

impl Error {
    /// Wrap an arbitrary operation error.
    pub fn operation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + 'static,
    {
        Error::Operation(Box::new(err))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Panics with a contract-violation message. Used at every `ut_dcheck`-equivalent call site.
#[track_caller]
pub(crate) fn contract_violation(msg: &'static str) -> ! {
    panic!("contract violation: {msg}");
}
