//! The awaitable abstraction (§4.1): a uniform probe interface over any suspendable value.
//!
//! Grounded on CppAsync's `Awaitable.h` / `AwaitableBase.h`. Introducing a new awaitable type
//! requires only implementing the operations below; the await protocol and combinators never
//! need to know the concrete type.
//!
//! The trait is split in two tiers, mirroring the original's `AwaitableBase` (non-generic) and
//! `CommonAwaitable<R>` (generic) split: [`AwaitableBase`] carries no associated type, so it can
//! be used as `dyn AwaitableBase` wherever code only needs to probe readiness or hand out a
//! waker — a coroutine's resume callback, a combinator's homogeneous child list. [`Awaitable`]
//! adds the type-carrying `take_result`/`take_error` pair for callers who know the concrete
//! result type and actually want to consume it.

use crate::error::Error;

/// The callback target registered on an awaitable and invoked at most once, when it completes.
///
/// A coroutine's await protocol implementation, and each combinator's internal subscriber,
/// implement this trait.
pub trait Awaiter {
    /// Called exactly once when the awaited value becomes ready.
    ///
    /// `who` identifies which awaitable triggered the resume, so a coroutine or combinator
    /// awaiting several values jointly can tell them apart (the "resumer-pointer" of §3).
    fn resume(&self, who: &dyn AwaitableBase);
}

/// The non-generic half of the probe interface (§4.1): readiness, error state, and the waker
/// slot. Object-safe, so it's what combinators and the await protocol hold as `dyn` references
/// over heterogeneous awaitables.
pub trait AwaitableBase {
    /// True once the value can be consumed (successfully or as an error).
    fn is_ready(&self) -> bool;

    /// True only when ready and the outcome is an error.
    fn has_error(&self) -> bool;

    /// Register (or clear, with `None`) the waker to invoke on completion.
    ///
    /// May only be called while not ready. Installing a waker when one is already installed is
    /// a contract violation; clearing (`None`) is always allowed, including from a destructor
    /// unwinding a canceled awaiter.
    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>);
}

/// The generic half of the probe interface: consuming the produced value or error.
///
/// `Result = ()` is the valid specialization for operations that only ever signal completion or
/// failure.
pub trait Awaitable: AwaitableBase {
    /// The type produced by a successful completion.
    type Result;

    /// Move the success value out. May only be called when ready and not failed.
    fn take_result(&mut self) -> Self::Result;

    /// Move the error out. May only be called when ready and failed.
    fn take_error(&mut self) -> Error;
}

// Pointer-like relays (§4.1: "two built-in pointer-like relays") so containers of owned /
// borrowed awaitables transparently degrade to containers of awaitables, mirroring the
// original's `selectAwaitable` overloads for `T*` / `std::unique_ptr<T>` / `reference_wrapper`.

impl<A: AwaitableBase + ?Sized> AwaitableBase for Box<A> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn has_error(&self) -> bool {
        (**self).has_error()
    }

    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>) {
        (**self).set_waker(waker)
    }
}

impl<A: Awaitable + ?Sized> Awaitable for Box<A> {
    type Result = A::Result;

    fn take_result(&mut self) -> Self::Result {
        (**self).take_result()
    }

    fn take_error(&mut self) -> Error {
        (**self).take_error()
    }
}

impl<'a, A: AwaitableBase + ?Sized> AwaitableBase for &'a mut A {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn has_error(&self) -> bool {
        (**self).has_error()
    }

    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>) {
        (**self).set_waker(waker)
    }
}

impl<'a, A: Awaitable + ?Sized> Awaitable for &'a mut A {
    type Result = A::Result;

    fn take_result(&mut self) -> Self::Result {
        (**self).take_result()
    }

    fn take_error(&mut self) -> Error {
        (**self).take_error()
    }
}
