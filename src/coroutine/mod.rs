//! The two coroutine flavors (§4.4): a shared vocabulary over resume-point-encoded (stackless)
//! and stack-preserving (stackful) coroutines.
//!
//! Grounded on CppAsync's `Coroutine.h`, which defines the common `resume`/`isDone`/`value`
//! surface both flavors implement so the async-frame glue (`crate::async_frame`) doesn't need to
//! know which one it's driving. Unlike the original, `resume`'s return doesn't also carry the
//! per-step value inline — CppAsync's own `operator()` is a plain `bool`, with `value()` the one
//! place a caller reads what a generator-style body produced; see `DESIGN.md` for why this port
//! keeps that split rather than folding a value into `Suspended`.

pub mod stackful;
pub mod stackless;

use crate::error::Error;

/// Outcome of driving a coroutine one step.
#[derive(Debug)]
pub enum CoroutineState<V> {
    /// Suspended at a yield point; call `resume` again to continue. A generator-style body that
    /// produced a value this step makes it available through [`Coroutine::value`].
    Suspended,
    /// Ran to completion — successfully, or with an error the body chose to surface.
    Done(Result<V, Error>),
    /// This `resume` re-entered a coroutine whose controlling frame was already mid-resume when
    /// the reentry happened (§4.4.1's destructor guard). The coroutine's own state was left
    /// untouched; don't call `resume` again expecting further progress from this step.
    Destructed,
}

impl<V> CoroutineState<V> {
    /// True once the coroutine has produced its final state.
    pub fn is_done(&self) -> bool {
        matches!(self, CoroutineState::Done(_))
    }
}

/// Common surface over both coroutine flavors.
///
/// `A` is the type threaded in on each resume, `V` the type produced when the coroutine finally
/// finishes.
pub trait Coroutine<A, V> {
    /// Drive the coroutine forward with `arg` as the value its current yield point receives.
    fn resume(&mut self, arg: A) -> CoroutineState<V>;

    /// True once [`Coroutine::resume`] has returned `Done`.
    fn is_done(&self) -> bool;

    /// The value produced by the most recent `Suspended` step, if the body is generator-style.
    /// `None` for flavors/bodies that never yield an interim value, and for every implementor
    /// before the first `resume` call.
    fn value(&self) -> Option<&V>;
}
