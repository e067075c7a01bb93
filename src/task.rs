//! The task/promise lifecycle (§4.3): the central correctness property of the library.
//!
//! Grounded on CppAsync's `Task.h`. The promise/task back-pointer is expressed here as a shared
//! `Rc<RefCell<TaskInner<R>>>` rather than the original's raw pointer into a sibling object —
//! this is what lets a detached promise keep completing storage alive after its task handle is
//! dropped (§4.3's `RunningDetached`) without the core having to reimplement the original's more
//! exotic `ST_RunningPromiseless` reattachment path, which the expanded spec's data model (§3)
//! does not require. `SharedPromise` follows the `Arc<Mutex<PromiseData<T>>>` shape of
//! `Kruemmelspalter-vex-rt-patched`'s `rtos/promise.rs`, adapted to `Rc<RefCell<_>>` since this
//! crate is single-threaded by design.

use crate::awaitable::{Awaitable, AwaitableBase, Awaiter};
use crate::cell::ResultCell;
use crate::error::{contract_violation, Error};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared lifecycle view across a Task/Promise pair (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Freshly constructed, no promise taken yet.
    Initial,
    /// Promise and task both live, linked.
    RunningAttached,
    /// Operation still running; the task handle has been detached, only the promise remains.
    RunningDetached,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
    /// Terminal cancellation; result cell is blank.
    Canceled,
}

impl TaskState {
    fn is_running(self) -> bool {
        matches!(self, TaskState::RunningAttached | TaskState::RunningDetached)
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }
}

/// Per-task hook object. There is at most one listener per task (§4.3).
///
/// `on_done` and `on_detach` are mutually exclusive: a task sees exactly one of the two
/// (invariant 2, §8).
pub trait Listener<R> {
    /// Called once, when the task completes or fails, before the waker resumes (§4.3 step 5).
    fn on_done(&mut self, result: &ResultCell<R>);

    /// Called once, only if the task is detached. Never called together with `on_done`.
    fn on_detach(&mut self) {}
}

struct TaskInner<R> {
    cell: ResultCell<R>,
    waker: Option<&'static dyn Awaiter>,
    listener: Option<Box<dyn Listener<R>>>,
    state: TaskState,
}

impl<R> TaskInner<R> {
    fn new() -> Self {
        TaskInner {
            cell: ResultCell::new(),
            waker: None,
            listener: None,
            state: TaskState::Initial,
        }
    }

    /// The completion protocol shared by `complete`/`fail` (§4.3).
    fn finish(inner: &Rc<RefCell<Self>>, write: impl FnOnce(&mut ResultCell<R>), state: TaskState) {
        let waker = {
            let mut this = inner.borrow_mut();
            if !this.state.is_running() {
                return; // not completable: silently dropped, per the completion protocol.
            }

            write(&mut this.cell);
            this.state = state;

            let waker = this.waker.take();

            if let Some(listener) = this.listener.as_mut() {
                // Step 5: the listener observes completion before the waker resumes anyone.
                listener.on_done(&this.cell);
            }

            waker
        };

        if let Some(waker) = waker {
            // Safety-relevant ordering: the result is already visible in the cell before the
            // waker is invoked (§4.3 step 4's "not invoked before the result is visible").
            tracing::trace!(?state, "task completed, resuming waker");
            // We can't hand the waker a `&dyn Awaitable` of `Task<R>` without reconstructing a
            // handle; the waker only needs to know *that* its subject is ready, which the
            // `TaskHandle` marker below provides.
            waker.resume(&TaskReadyMarker);
        }
    }
}

/// A zero-sized stand-in passed to `Awaiter::resume` when the resumer is a `Task`.
///
/// The await protocol and combinators only use the `resume` callback to learn "something I was
/// watching is now ready"; they re-probe the awaitable they hold directly rather than downcast
/// the argument, so a marker type is sufficient here (the original passes `this`, a `Task*`, for
/// the same purpose: identifying *which* awaited object fired, not carrying its value).
struct TaskReadyMarker;

impl AwaitableBase for TaskReadyMarker {
    fn is_ready(&self) -> bool {
        true
    }
    fn has_error(&self) -> bool {
        false
    }
    fn set_waker(&mut self, _waker: Option<&'static dyn Awaiter>) {}
}

impl Awaitable for TaskReadyMarker {
    type Result = ();
    fn take_result(&mut self) -> Self::Result {}
    fn take_error(&mut self) -> Error {
        contract_violation("take_error() called on TaskReadyMarker")
    }
}

/// A single pending asynchronous result (§3).
pub struct Task<R> {
    inner: Rc<RefCell<TaskInner<R>>>,
    /// Set by `detach()` so `Drop` doesn't re-cancel an operation that's meant to keep running.
    detached: bool,
}

impl<R> Task<R> {
    /// Construct a fresh, not-yet-started task.
    pub fn new() -> Self {
        Task {
            inner: Rc::new(RefCell::new(TaskInner::new())),
            detached: false,
        }
    }

    /// Construct a task with an attached listener (mirrors `makeTaskWithListener`).
    pub fn with_listener(listener: Box<dyn Listener<R>>) -> Self {
        let mut inner = TaskInner::new();
        inner.listener = Some(listener);
        Task {
            inner: Rc::new(RefCell::new(inner)),
            detached: false,
        }
    }

    /// True once a promise has been taken and the operation has not reached a terminal state.
    pub fn is_running(&self) -> bool {
        self.inner.borrow().state.is_running()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.inner.borrow().state
    }

    /// True while a listener is attached (cleared once `on_detach()` has consumed it).
    pub fn has_listener(&self) -> bool {
        self.inner.borrow().listener.is_some()
    }

    /// Take the write end of this task. May be called only once, while `Initial`.
    pub fn take_promise(&mut self) -> Promise<R> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != TaskState::Initial {
            contract_violation("take_promise() called more than once");
        }
        inner.state = TaskState::RunningAttached;
        drop(inner);

        Promise {
            inner: self.inner.clone(),
            released: false,
        }
    }

    /// Detach the task: the operation keeps running, but only the promise can complete it from
    /// now on (§4.3, `RunningAttached -> RunningDetached`).
    pub fn detach(mut self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != TaskState::RunningAttached {
            contract_violation("detach() called on a task that is not running-attached");
        }
        inner.state = TaskState::RunningDetached;

        // The listener is moved out and consumed *before* on_detach runs, so a later completion
        // on the now-detached promise can never touch listener-owned resources (§4.3, §9 open
        // question #1, tested in `detach_then_complete_does_not_touch_listener` below).
        if let Some(mut listener) = inner.listener.take() {
            listener.on_detach();
        }
        drop(inner);

        // Prevent our own Drop impl from canceling an operation we just detached.
        self.detached = true;
    }

    /// Force the task to `Canceled`. No-op if already terminal.
    pub fn cancel(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state.is_terminal() {
            return;
        }
        tracing::trace!("task canceled");
        inner.state = TaskState::Canceled;
        inner.listener = None;
        inner.waker = None;
    }

    /// Read the completed value, consuming it. Panics if not completed.
    pub fn result(&mut self) -> R {
        let mut inner = self.inner.borrow_mut();
        if inner.state != TaskState::Completed {
            contract_violation("result() called on a task that has not completed successfully");
        }
        inner.cell.take_value()
    }

    /// Read the failure, consuming it. Panics if not failed.
    pub fn error(&mut self) -> Error {
        let mut inner = self.inner.borrow_mut();
        if inner.state != TaskState::Failed {
            contract_violation("error() called on a task that has not failed");
        }
        inner.cell.take_error()
    }
}

impl<R> Default for Task<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Drop for Task<R> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        if inner.state == TaskState::RunningAttached {
            tracing::trace!("task dropped while running, canceling");
            inner.state = TaskState::Canceled;
            inner.listener = None;
            inner.waker = None;
        }
    }
}

impl<R> AwaitableBase for Task<R> {
    fn is_ready(&self) -> bool {
        matches!(
            self.inner.borrow().state,
            TaskState::Completed | TaskState::Failed
        )
    }

    fn has_error(&self) -> bool {
        self.inner.borrow().state == TaskState::Failed
    }

    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>) {
        let mut inner = self.inner.borrow_mut();
        if waker.is_some() {
            debug_assert!(!inner.state.is_terminal(), "set_waker on a ready task");
            if inner.waker.is_some() {
                contract_violation("set_waker() called while a waker is already installed");
            }
        }
        inner.waker = waker;
    }
}

impl<R> Awaitable for Task<R> {
    type Result = R;

    fn take_result(&mut self) -> R {
        self.result()
    }

    fn take_error(&mut self) -> Error {
        self.error()
    }
}

/// The write end of a task (§4.3).
pub struct Promise<R> {
    inner: Rc<RefCell<TaskInner<R>>>,
    released: bool,
}

impl<R> Promise<R> {
    /// True while the task is still `Running*` and this promise hasn't been released.
    pub fn is_completable(&self) -> bool {
        !self.released && self.inner.borrow().state.is_running()
    }

    /// Current lifecycle state as seen from the promise side.
    pub fn state(&self) -> TaskState {
        self.inner.borrow().state
    }

    /// Complete the task with a value. No-op if no longer completable (idempotence law, §8).
    pub fn complete(&self, value: R) {
        if self.released {
            return;
        }
        TaskInner::finish(&self.inner, |cell| cell.complete(value), TaskState::Completed);
    }

    /// Fail the task with an error. No-op if no longer completable.
    pub fn fail(&self, error: Error) {
        if self.released {
            return;
        }
        TaskInner::finish(&self.inner, |cell| cell.fail(error), TaskState::Failed);
    }

    /// Force the task to `Canceled`. No-op if already terminal or released.
    pub fn cancel(&self) {
        if self.released {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = TaskState::Canceled;
        inner.listener = None;
        inner.waker = None;
    }

    /// Relinquish this promise's ability to complete the task, without canceling it.
    ///
    /// Deliberately minimal, per the spec's own open question about the `release()`/Detached
    /// flow: the core gives no help beyond marking this handle inert. Callers who rely on this
    /// must keep another path (e.g. a [`SharedPromise`] clone taken beforehand) alive if they
    /// still want to complete the task later.
    pub fn release(&mut self) {
        self.released = true;
    }

    /// Convert into a reference-counted, cloneable variant for producers that can't move a
    /// unique `Promise` across callback boundaries (e.g. a host callback registered by value).
    pub fn share(self) -> SharedPromise<R> {
        SharedPromise {
            inner: Rc::new(self),
        }
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        // Symmetric half of the cancellation contract: destroying a live promise cancels the
        // underlying task (§4.3).
        if !self.released {
            self.cancel();
        }
    }
}

/// A reference-counted, cloneable [`Promise`] (§6, `Promise::share()`).
///
/// `Rc`-based rather than `Arc`-based: this crate's core types are single-threaded by design
/// (§5). Cross-thread producers must funnel completions back through the host loop first.
pub struct SharedPromise<R> {
    inner: Rc<Promise<R>>,
}

// Written by hand rather than `#[derive(Clone)]`: deriving would add a spurious `R: Clone`
// bound, even though cloning an `Rc` never needs the pointee to be `Clone`.
impl<R> Clone for SharedPromise<R> {
    fn clone(&self) -> Self {
        SharedPromise {
            inner: self.inner.clone(),
        }
    }
}

impl<R> SharedPromise<R> {
    /// Complete the underlying task. No-op if no longer completable.
    pub fn complete(&self, value: R) {
        self.inner.complete(value);
    }

    /// Fail the underlying task. No-op if no longer completable.
    pub fn fail(&self, error: Error) {
        self.inner.fail(error);
    }

    /// Force the underlying task to `Canceled`.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// True while the underlying task is still completable.
    pub fn is_completable(&self) -> bool {
        self.inner.is_completable()
    }
}

// A handful of convenience constructors, mirroring CppAsync's "Task generators" (§4.3).

/// A task that has already completed successfully.
pub fn make_completed_task<R>(value: R) -> Task<R> {
    let mut task = Task::new();
    let promise = task.take_promise();
    promise.complete(value);
    task
}

/// A task that has already failed.
pub fn make_failed_task<R>(error: Error) -> Task<R> {
    let mut task = Task::new();
    let promise = task.take_promise();
    promise.fail(error);
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_task_is_initial() {
        let task: Task<i32> = Task::new();
        assert_eq!(task.state(), TaskState::Initial);
        assert!(!task.is_running());
    }

    #[test]
    fn complete_roundtrip() {
        let mut task: Task<i32> = Task::new();
        let promise = task.take_promise();
        assert!(promise.is_completable());

        promise.complete(7);

        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.is_ready());
        assert!(!task.has_error());
        assert_eq!(task.result(), 7);
    }

    #[test]
    fn fail_roundtrip() {
        let mut task: Task<i32> = Task::new();
        let promise = task.take_promise();

        promise.fail(Error::Allocation);

        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.has_error());
        assert!(matches!(task.error(), Error::Allocation));
    }

    #[test]
    fn fail_twice_is_noop() {
        let mut task: Task<i32> = Task::new();
        let promise = task.take_promise();

        promise.fail(Error::Allocation);
        promise.fail(Error::ForcedUnwind); // second call must be silently dropped

        assert!(matches!(task.error(), Error::Allocation));
    }

    #[test]
    fn cancel_twice_is_noop() {
        let mut task: Task<i32> = Task::new();
        task.cancel();
        task.cancel();
        assert_eq!(task.state(), TaskState::Canceled);
    }

    #[test]
    fn dropping_task_cancels_promise() {
        let mut task: Task<i32> = Task::new();
        let promise = task.take_promise();
        drop(task);

        assert!(!promise.is_completable());
        promise.complete(1); // silently dropped, task already gone
    }

    #[test]
    fn dropping_promise_cancels_task() {
        let mut task: Task<i32> = Task::new();
        let promise = task.take_promise();
        drop(promise);

        assert_eq!(task.state(), TaskState::Canceled);
    }

    struct RecordingListener {
        done: Rc<RefCell<bool>>,
        detached: Rc<RefCell<bool>>,
    }

    impl Listener<i32> for RecordingListener {
        fn on_done(&mut self, _result: &ResultCell<i32>) {
            *self.done.borrow_mut() = true;
        }

        fn on_detach(&mut self) {
            *self.detached.borrow_mut() = true;
        }
    }

    #[test]
    fn listener_sees_on_done_not_on_detach() {
        let done = Rc::new(RefCell::new(false));
        let detached = Rc::new(RefCell::new(false));
        let mut task = Task::with_listener(Box::new(RecordingListener {
            done: done.clone(),
            detached: detached.clone(),
        }));
        let promise = task.take_promise();
        promise.complete(1);

        assert!(*done.borrow());
        assert!(!*detached.borrow());
    }

    #[test]
    fn has_listener_reflects_attachment_and_detach() {
        let done = Rc::new(RefCell::new(false));
        let detached = Rc::new(RefCell::new(false));
        let mut task = Task::with_listener(Box::new(RecordingListener {
            done: done.clone(),
            detached: detached.clone(),
        }));
        assert!(task.has_listener());

        task.detach();
        assert!(!task.has_listener());
    }

    #[test]
    fn detach_then_complete_does_not_touch_listener() {
        // Regression test for the open question in SPEC_FULL.md §9: the listener must be
        // released before on_detach runs, so a completion that arrives after detach can never
        // reach into listener-owned state.
        let done = Rc::new(RefCell::new(false));
        let detached = Rc::new(RefCell::new(false));
        let mut task = Task::with_listener(Box::new(RecordingListener {
            done: done.clone(),
            detached: detached.clone(),
        }));
        let promise = task.take_promise();

        task.detach();
        assert!(*detached.borrow());

        promise.complete(1); // must not panic, must not touch the (already-gone) listener
        assert!(!*done.borrow());
    }

    #[test]
    fn detach_then_drop_task_keeps_promise_completable() {
        // S6 scenario (spec §8).
        let mut task: Task<i32> = Task::new();
        let promise = task.take_promise();
        task.detach();

        assert!(promise.is_completable());
        promise.complete(5); // accepted silently; no task handle observes it
    }

    #[test]
    fn make_completed_and_failed_helpers() {
        let mut ok: Task<i32> = make_completed_task(3);
        assert_eq!(ok.result(), 3);

        let mut err: Task<i32> = make_failed_task(Error::Allocation);
        assert!(matches!(err.error(), Error::Allocation));
    }

    #[test]
    fn shared_promise_can_be_cloned_and_completed_once() {
        let mut task: Task<i32> = Task::new();
        let shared = task.take_promise().share();
        let other = shared.clone();

        shared.complete(9);
        other.complete(10); // no-op, already done

        assert_eq!(task.result(), 9);
    }
}
