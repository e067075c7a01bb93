//! Resume-point-encoded coroutines: no dedicated stack, at the cost of hand-encoding the body as
//! an explicit state machine (§4.4.1).
//!
//! Has no counterpart in the teacher crate — grounded directly on CppAsync's
//! `StacklessCoroutine.h` / `impl/StacklessCoroutineImpl.h`, translated from the original's
//! macro-generated `switch` dispatch into a plain Rust `match` over a stored resume point, in the
//! teacher's own naming conventions (`State`, `spawn`) where they carry over.
//!
//! A resume-point coroutine is a hand-written `Coroutine` implementor whose `resume` method
//! starts with `match self.resume_point() { ... }` and ends every live branch by recording where
//! it left off before returning. There is no generated code here: `ResumePointCoroutine` is the
//! trait a body implements by hand, and `ResumeState` is the bitpacked "where was I" token it
//! threads through.

use std::cell::Cell;

use crate::error::Error;

use super::{Coroutine, CoroutineState};

/// A resume point: a line marker plus a small "handler id" used to re-enter the correct nested
/// error-handling region after a loopback (§4.4.1's "24-bit line + 8-bit handler id" bitpack).
///
/// The teacher crate and CppAsync both encode this as a single integer; splitting it into two
/// fields here is equivalent and avoids hand-rolled bit-twiddling at every call site while still
/// being `Copy` and cheap to store inline in the coroutine struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumeState {
    line: u32,
    handler: u8,
}

impl ResumeState {
    /// The entry resume point: "not started yet".
    pub const START: ResumeState = ResumeState { line: 0, handler: 0 };

    /// Construct a resume point at a given source-level marker, outside any handler region.
    pub const fn at(line: u32) -> Self {
        ResumeState { line, handler: 0 }
    }

    /// Construct a resume point inside nested handler region `handler`, e.g. a `?`-propagation
    /// boundary that needs to re-enter a specific catch site on loopback.
    pub const fn in_handler(line: u32, handler: u8) -> Self {
        ResumeState { line, handler }
    }

    /// The line marker, used as the `match` discriminant in a `ResumePointCoroutine::resume`
    /// body.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Which nested handler region (if any) this resume point belongs to.
    pub fn handler(&self) -> u8 {
        self.handler
    }
}

thread_local! {
    /// A single-slot loopback channel used to route an error raised inside one resume step back
    /// to the point that asked for it (§4.4.1: "thread-local loopback exception slot"). Only one
    /// resume-point coroutine is ever actively stepping on a given thread at a time, so a single
    /// slot — rather than a stack of them — is sufficient, matching the teacher's single active
    /// coroutine per OS thread invariant.
    static LOOPBACK: Cell<Option<Error>> = Cell::new(None);
}

/// Store an error in the thread-local loopback slot, to be retrieved by `take_loopback_error` at
/// the next resume-point re-entry.
pub fn set_loopback_error(error: Error) {
    LOOPBACK.with(|cell| cell.set(Some(error)));
}

/// Retrieve (and clear) the loopback slot. Returns `None` if no error is pending.
pub fn take_loopback_error() -> Option<Error> {
    LOOPBACK.with(|cell| cell.take())
}

/// Implemented by hand by a resume-point-encoded coroutine body.
///
/// A typical implementor stores a `ResumeState` field plus whatever locals need to survive a
/// suspend (since, unlike the stackful flavor, nothing survives on a call stack here), and
/// starts its `step` with a `match` on the current resume point.
pub trait ResumePointCoroutine<A, V> {
    /// Current resume point. `ResumeState::START` before the first call.
    fn resume_point(&self) -> ResumeState;

    /// Run from the current resume point until the next suspend or the final return, updating
    /// the stored resume point before returning in either case.
    fn step(&mut self, arg: A) -> CoroutineState<V>;

    /// The value this body produced at its most recent suspend, if it's generator-style.
    /// Queried once per `resume`, right after a `Suspended` step; bodies that never yield a
    /// value (the common case) can leave this at its default.
    fn last_value(&self) -> Option<&V> {
        None
    }
}

/// Adapts any [`ResumePointCoroutine`] to the common [`Coroutine`] surface (§4.4.1 / §4.4).
pub struct StacklessCoroutine<C> {
    inner: C,
    done: bool,
    /// Destructor guard (§4.4.1): set for the duration of a `step` call, so a reentrant `resume`
    /// reached through some side channel while the first call is still on the stack — rather than
    /// racing `inner` — reports `Destructed` without touching it. Safe-Rust borrowing already
    /// prevents the literal C++ hazard (freeing an object while a `&mut` into it is live); this
    /// guard covers the one case Rust doesn't rule out by itself: a body that, through interior
    /// mutability a host wires up around its own coroutine, resumes itself before the outer call
    /// returns.
    driving: Cell<bool>,
}

impl<C> StacklessCoroutine<C> {
    /// Wrap a hand-written resume-point body.
    pub fn new(inner: C) -> Self {
        StacklessCoroutine {
            inner,
            done: false,
            driving: Cell::new(false),
        }
    }

    /// Borrow the underlying body (e.g. to read locals set once it's done).
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<A, V, C: ResumePointCoroutine<A, V>> Coroutine<A, V> for StacklessCoroutine<C> {
    fn resume(&mut self, arg: A) -> CoroutineState<V> {
        if self.done {
            crate::error::contract_violation("resume() called on a finished stackless coroutine");
        }
        if self.driving.replace(true) {
            return CoroutineState::Destructed;
        }
        let state = self.inner.step(arg);
        self.driving.set(false);
        if state.is_done() {
            self.done = true;
        }
        state
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn value(&self) -> Option<&V> {
        self.inner.last_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A small resume-point body computing the first `n` Fibonacci numbers, demonstrating the
    /// style a hand-written generator takes in this encoding (§8 scenario S3): each call to
    /// `step` resumes right where the last one left off via a `match` on the stored line marker,
    /// with the loop counters kept as ordinary struct fields rather than captured on a stack, and
    /// the value it just produced cached in `last` for `ResumePointCoroutine::last_value` to
    /// report — mirroring `ex_fibo.cpp`'s `while (fibo()) print(fibo.valueAs<int>())`, one value
    /// per resume rather than a batch collected up front.
    struct Fibonacci {
        resume_point: ResumeState,
        remaining: u32,
        a: u64,
        b: u64,
        last: Option<u64>,
    }

    impl Fibonacci {
        fn new(count: u32) -> Self {
            Fibonacci {
                resume_point: ResumeState::START,
                remaining: count,
                a: 0,
                b: 1,
                last: None,
            }
        }
    }

    impl ResumePointCoroutine<(), u64> for Fibonacci {
        fn resume_point(&self) -> ResumeState {
            self.resume_point
        }

        fn step(&mut self, _arg: ()) -> CoroutineState<u64> {
            match self.resume_point.line() {
                0 => {}
                1 => {
                    // Re-entered after a prior suspend; `remaining`/`a`/`b` already reflect the
                    // last iteration's progress.
                }
                _ => crate::error::contract_violation("Fibonacci resumed at an unknown point"),
            }

            if self.remaining == 0 {
                return CoroutineState::Done(Ok(self.last.unwrap_or(0)));
            }

            let value = self.a;
            let next = self.a + self.b;
            self.a = self.b;
            self.b = next;
            self.remaining -= 1;
            self.last = Some(value);

            self.resume_point = ResumeState::at(1);
            CoroutineState::Suspended
        }

        fn last_value(&self) -> Option<&u64> {
            self.last.as_ref()
        }
    }

    #[test]
    fn fibonacci_generator_resumes_across_steps() {
        let mut co = StacklessCoroutine::new(Fibonacci::new(6));
        let expected = [0u64, 1, 1, 2, 3, 5];
        for want in expected {
            match co.resume(()) {
                CoroutineState::Suspended => {}
                other => panic!("expected Suspended, got {other:?}"),
            }
            assert_eq!(co.value(), Some(&want));
        }
        match co.resume(()) {
            CoroutineState::Done(Ok(_)) => {}
            other => panic!("unexpected state: {other:?}"),
        }
        assert!(co.is_done());
    }

    #[test]
    fn loopback_slot_roundtrips() {
        assert!(take_loopback_error().is_none());
        set_loopback_error(Error::Allocation);
        assert!(matches!(take_loopback_error(), Some(Error::Allocation)));
        assert!(take_loopback_error().is_none());
    }
}
