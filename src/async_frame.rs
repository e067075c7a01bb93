//! The glue that binds a coroutine to a [`Promise`], drives it, and routes completions (§4.4,
//! §4.5): an `AsyncFrame` is what makes a coroutine body usable as an ordinary `Task`.
//!
//! Grounded on CppAsync's `StackfulAsync.h` / `StacklessAsync.h` / `impl/StackfulAsyncImpl.h`:
//! a self-owning heap object that drives its coroutine forward whenever something it's awaiting
//! becomes ready, and deletes itself once the coroutine's result has been handed to its promise.
//! `await_awaitable` is this crate's `await_`, from CppAsync's `Await.h`.

use std::cell::{Cell, RefCell};

use crate::awaitable::{Awaitable, AwaitableBase, Awaiter};
use crate::config::Config;
use crate::coroutine::stackful::{StackfulCoroutine, Yielder};
use crate::coroutine::{Coroutine, CoroutineState};
use crate::error::Error;
use crate::task::{Promise, Task};

/// The await protocol (§4.5), usable from either coroutine flavor: precheck, subscribe only if
/// not already ready, suspend, then consume exactly one of the result or the error.
///
/// `suspend` is whatever the calling coroutine does to yield control back to its driver — for a
/// stack-preserving body this is `yielder.suspend()`; a resume-point body instead records its
/// next resume point and returns `CoroutineState::Suspended`, so it doesn't call this helper
/// directly (see `crate::coroutine::stackless`'s module docs).
pub fn await_awaitable<Aw>(
    waker: &'static dyn Awaiter,
    awaitable: &mut Aw,
    suspend: impl FnOnce() -> Result<(), Error>,
) -> Result<Aw::Result, Error>
where
    Aw: Awaitable,
{
    if !awaitable.is_ready() {
        awaitable.set_waker(Some(waker));
        suspend()?;
        awaitable.set_waker(None);
    }

    if awaitable.has_error() {
        Err(awaitable.take_error())
    } else {
        Ok(awaitable.take_result())
    }
}

/// Binds a `Coroutine<(), R>` to a `Promise<R>` and drives it to completion.
///
/// Self-owning: constructed via `Box::leak` and freed by `finish` once the coroutine is done, so
/// it can hand out `&'static dyn Awaiter` references to whatever it awaits without the caller
/// having to keep anything alive.
pub struct AsyncFrame<C, R> {
    coroutine: RefCell<Option<C>>,
    promise: RefCell<Option<Promise<R>>>,
    /// Destructor guard (§4.4.1), hoisted to the frame level: set for the duration of `drive`, so
    /// a waker that fires synchronously out of `set_waker` (rather than genuinely deferring)
    /// re-enters `drive` without re-borrowing `coroutine` a second time. `coroutine`/`promise`
    /// being `RefCell`s already turns that reentry into a panic; this flag turns it into the
    /// documented `Destructed`-flavored no-op instead.
    driving: Cell<bool>,
}

impl<C, R> AsyncFrame<C, R>
where
    C: Coroutine<(), R> + 'static,
    R: 'static,
{
    /// Construct a task whose coroutine is built from a reference to its own (not-yet-running)
    /// frame, so the body can capture that reference to await things through.
    ///
    /// `build` runs before the coroutine's first step, so it must not itself drive the frame.
    pub fn spawn(build: impl FnOnce(&'static AsyncFrame<C, R>) -> C) -> Task<R> {
        let mut task = Task::new();
        let promise = task.take_promise();

        let frame: &'static mut AsyncFrame<C, R> = Box::leak(Box::new(AsyncFrame {
            coroutine: RefCell::new(None),
            promise: RefCell::new(Some(promise)),
            driving: Cell::new(false),
        }));
        let frame: &'static AsyncFrame<C, R> = frame;

        let coroutine = build(frame);
        *frame.coroutine.borrow_mut() = Some(coroutine);
        frame.drive();

        task
    }

    fn drive(&'static self) {
        if self.driving.replace(true) {
            tracing::trace!("async frame re-entered while already driving; ignoring");
            return;
        }

        let state = self
            .coroutine
            .borrow_mut()
            .as_mut()
            .expect("frame driven before its coroutine was installed")
            .resume(());

        self.driving.set(false);

        match state {
            CoroutineState::Done(result) => self.finish(result),
            CoroutineState::Destructed => {
                tracing::trace!("coroutine reported Destructed; leaving frame as is");
            }
            CoroutineState::Suspended => {}
        }
    }

    fn finish(&'static self, result: Result<R, Error>) {
        if let Some(promise) = self.promise.borrow_mut().take() {
            tracing::trace!(ok = result.is_ok(), "async frame finished, completing promise");
            match result {
                Ok(value) => promise.complete(value),
                Err(error) => promise.fail(error),
            }
        }
        self.coroutine.borrow_mut().take();

        // SAFETY: every `AsyncFrame` is constructed exclusively by `spawn`, via `Box::leak`, and
        // `finish` is the only place that reclaims it — called at most once, since `self.promise`
        // is `None` on every subsequent completion of the (already finished) coroutine.
        unsafe {
            drop(Box::from_raw(self as *const Self as *mut Self));
        }
    }
}

impl<C, R> Awaiter for AsyncFrame<C, R>
where
    C: Coroutine<(), R> + 'static,
    R: 'static,
{
    fn resume(&self, _who: &dyn AwaitableBase) {
        // SAFETY: `AsyncFrame` only ever exists behind a leaked, `'static` allocation (see
        // `spawn`); `Awaiter::resume`'s `&self` is always a reborrow of that same `'static` value.
        let this: &'static Self = unsafe { &*(self as *const Self) };
        this.drive();
    }
}

/// Spawn a stack-preserving coroutine body as a `Task<R>` (§4.4.2 + §4.4/§4.5 combined).
///
/// `body` receives the frame's own `&'static dyn Awaiter` (to hand to [`await_awaitable`]) and
/// the `Yielder` it must suspend through.
pub fn spawn_stackful<R, F>(config: &Config, body: F) -> Task<R>
where
    R: 'static,
    F: FnOnce(&'static dyn Awaiter, &Yielder<(), R>) -> Result<R, Error> + 'static,
{
    let config = *config;
    AsyncFrame::spawn(move |frame: &'static AsyncFrame<StackfulCoroutine<(), R>, R>| {
        StackfulCoroutine::spawn_with(move |yielder, ()| body(frame, yielder), &config)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn completes_immediately_when_body_never_awaits() {
        let mut task = spawn_stackful(&Config::new(), |_waker, _y| Ok(7));
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.result(), 7);
    }

    #[test]
    fn awaits_an_inner_task_and_resumes_on_completion() {
        let mut inner: Task<i32> = Task::new();
        let inner_promise = inner.take_promise();

        let mut outer = spawn_stackful(&Config::new(), move |waker, yielder| {
            let value = await_awaitable(waker, &mut inner, || yielder.suspend())?;
            Ok(value * 2)
        });

        // The coroutine suspended at the await point; outer task hasn't completed yet.
        assert_eq!(outer.state(), TaskState::RunningAttached);

        inner_promise.complete(21); // drives the frame's waker, which resumes the coroutine

        assert_eq!(outer.state(), TaskState::Completed);
        assert_eq!(outer.result(), 42);
    }

    #[test]
    fn propagates_inner_failure() {
        let mut inner: Task<i32> = Task::new();
        let inner_promise = inner.take_promise();

        let mut outer = spawn_stackful(&Config::new(), move |waker, yielder| {
            let value = await_awaitable(waker, &mut inner, || yielder.suspend())?;
            Ok(value)
        });

        inner_promise.fail(Error::Allocation);

        assert_eq!(outer.state(), TaskState::Failed);
        assert!(matches!(outer.error(), Error::Allocation));
    }
}
