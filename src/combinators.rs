//! `any`/`some`/`all`: waiting on several awaitables at once (§4.6).
//!
//! Grounded on CppAsync's `Combinators.h` — `AnyAwaiter`/`SomeAwaiter` and their
//! precheck-then-subscribe construction. Each combinator here is itself an [`Awaitable`], so it
//! composes with [`crate::async_frame::await_awaitable`] exactly like any other awaitable: a
//! coroutine can `any(tasks)` and then await the combinator the same way it would await a single
//! task.
//!
//! Like [`crate::task::Task`], a combinator that hasn't settled by construction time needs a
//! `'static` address to hand its children as their waker (they call back into it when they
//! settle), so it's built behind `Box::leak`. Once it's ready, [`Any::reclaim`] (and its `Some`/
//! `All` equivalents) hands the box back so the caller isn't stuck leaking memory for the whole
//! process lifetime.

use std::cell::{Cell, RefCell};

use crate::awaitable::{Awaitable, AwaitableBase, Awaiter};
use crate::error::{contract_violation, Error};

/// Complete as soon as any one child is ready, successfully or not (§4.6).
pub struct Any<Aw: Awaitable> {
    children: RefCell<Vec<Aw>>,
    winner: Cell<Option<usize>>,
    external_waker: Cell<Option<&'static dyn Awaiter>>,
}

impl<Aw: Awaitable + 'static> Any<Aw> {
    /// Build and immediately leak an `Any` combinator over `children` (§4.6 precheck: a child
    /// that's already ready is picked up here, with no subscription needed).
    pub fn spawn(children: Vec<Aw>) -> &'static mut Self {
        assert!(!children.is_empty(), "any(..) requires at least one child");
        let winner = children.iter().position(|c| c.is_ready());
        Box::leak(Box::new(Any {
            children: RefCell::new(children),
            winner: Cell::new(winner),
            external_waker: Cell::new(None),
        }))
    }

    /// Reclaim a combinator leaked by [`Any::spawn`] once it's no longer being awaited.
    ///
    /// # Safety
    /// `this` must be the unique `&'static mut` returned by a prior `Any::spawn` call, not yet
    /// reclaimed.
    pub unsafe fn reclaim(this: &'static mut Self) -> Box<Self> {
        Box::from_raw(this as *mut Self)
    }

    /// The children, for reading the winning one's result after this combinator is ready.
    pub fn children_mut(&mut self) -> &mut [Aw] {
        self.children.get_mut()
    }

    fn rescan(&self) {
        if self.winner.get().is_some() {
            return;
        }
        if let Some(idx) = self.children.borrow().iter().position(|c| c.is_ready()) {
            self.winner.set(Some(idx));
        }
    }

    fn unsubscribe_all(&self) {
        for child in self.children.borrow_mut().iter_mut() {
            if !child.is_ready() {
                child.set_waker(None);
            }
        }
    }
}

impl<Aw: Awaitable + 'static> AwaitableBase for Any<Aw> {
    fn is_ready(&self) -> bool {
        self.winner.get().is_some()
    }

    fn has_error(&self) -> bool {
        false // "any" never fails on its own account; it just picks whoever settled first.
    }

    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>) {
        match waker {
            Some(w) => {
                self.external_waker.set(Some(w));
                // SAFETY: `Any` is only ever reachable through the `&'static` returned by
                // `spawn`, so reborrowing `self` as `'static` here is sound.
                let this: &'static Self = unsafe { &*(self as *const Self) };
                for child in this.children.borrow_mut().iter_mut() {
                    if !child.is_ready() {
                        child.set_waker(Some(this));
                    }
                }
            }
            None => {
                self.external_waker.set(None);
                self.unsubscribe_all();
            }
        }
    }
}

impl<Aw: Awaitable + 'static> Awaitable for Any<Aw> {
    type Result = usize;

    fn take_result(&mut self) -> usize {
        self.winner
            .get()
            .unwrap_or_else(|| contract_violation("Any::take_result called before ready"))
    }

    fn take_error(&mut self) -> Error {
        contract_violation("Any never completes as an error itself")
    }
}

impl<Aw: Awaitable + 'static> Awaiter for Any<Aw> {
    fn resume(&self, _who: &dyn AwaitableBase) {
        self.rescan();
        if self.winner.get().is_some() {
            self.unsubscribe_all();
            if let Some(w) = self.external_waker.take() {
                w.resume(self);
            }
        }
    }
}

/// Complete once `k` children have succeeded, or fail once succeeding is no longer possible
/// (§4.6).
pub struct Some<Aw: Awaitable> {
    children: RefCell<Vec<Aw>>,
    settled: RefCell<Vec<bool>>,
    k: usize,
    succeeded: RefCell<Vec<usize>>,
    failed: RefCell<Vec<usize>>,
    external_waker: Cell<Option<&'static dyn Awaiter>>,
}

impl<Aw: Awaitable + 'static> Some<Aw> {
    /// Build and leak a `some(k, children)` combinator. `k` must be at most `children.len()`;
    /// `k == 0` completes synchronously with an empty success list.
    pub fn spawn(k: usize, children: Vec<Aw>) -> &'static mut Self {
        assert!(
            k <= children.len(),
            "some(k, ..) requires k <= children.len()"
        );
        let settled = std::iter::repeat(false).take(children.len()).collect();
        let this = Box::new(Some {
            children: RefCell::new(children),
            settled: RefCell::new(settled),
            k,
            succeeded: RefCell::new(Vec::new()),
            failed: RefCell::new(Vec::new()),
            external_waker: Cell::new(None),
        });
        let leaked = Box::leak(this);
        leaked.rescan();
        leaked
    }

    /// # Safety
    /// `this` must be the unique `&'static mut` returned by a prior `Some::spawn` call.
    pub unsafe fn reclaim(this: &'static mut Self) -> Box<Self> {
        Box::from_raw(this as *mut Self)
    }

    /// The children, for reading the succeeded ones' results after this combinator is ready.
    pub fn children_mut(&mut self) -> &mut [Aw] {
        self.children.get_mut()
    }

    fn total(&self) -> usize {
        self.settled.borrow().len()
    }

    fn rescan(&self) {
        if self.is_ready() {
            return;
        }
        let mut children = self.children.borrow_mut();
        let mut settled = self.settled.borrow_mut();
        for (idx, child) in children.iter_mut().enumerate() {
            if settled[idx] || !child.is_ready() {
                continue;
            }
            settled[idx] = true;
            if child.has_error() {
                self.failed.borrow_mut().push(idx);
            } else {
                self.succeeded.borrow_mut().push(idx);
            }
        }
    }

    fn unsubscribe_all(&self) {
        let mut children = self.children.borrow_mut();
        let settled = self.settled.borrow();
        for (idx, child) in children.iter_mut().enumerate() {
            if !settled[idx] {
                child.set_waker(None);
            }
        }
    }
}

impl<Aw: Awaitable + 'static> AwaitableBase for Some<Aw> {
    fn is_ready(&self) -> bool {
        self.succeeded.borrow().len() >= self.k
            || self.failed.borrow().len() > self.total() - self.k
    }

    fn has_error(&self) -> bool {
        self.succeeded.borrow().len() < self.k && self.failed.borrow().len() > self.total() - self.k
    }

    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>) {
        match waker {
            Some(w) => {
                self.external_waker.set(Some(w));
                let this: &'static Self = unsafe { &*(self as *const Self) };
                let mut children = this.children.borrow_mut();
                let settled = this.settled.borrow();
                for (idx, child) in children.iter_mut().enumerate() {
                    if !settled[idx] {
                        child.set_waker(Some(this));
                    }
                }
            }
            None => {
                self.external_waker.set(None);
                self.unsubscribe_all();
            }
        }
    }
}

impl<Aw: Awaitable + 'static> Awaitable for Some<Aw> {
    type Result = Vec<usize>;

    fn take_result(&mut self) -> Vec<usize> {
        if !AwaitableBase::is_ready(self) || AwaitableBase::has_error(self) {
            contract_violation("Some::take_result called while not ready-with-success");
        }
        std::mem::take(self.succeeded.get_mut())
    }

    fn take_error(&mut self) -> Error {
        let idx = self
            .failed
            .get_mut()
            .first()
            .copied()
            .unwrap_or_else(|| contract_violation("Some::take_error called before ready-with-error"));
        self.children.get_mut()[idx].take_error()
    }
}

impl<Aw: Awaitable + 'static> Awaiter for Some<Aw> {
    fn resume(&self, _who: &dyn AwaitableBase) {
        self.rescan();
        if AwaitableBase::is_ready(self) {
            self.unsubscribe_all();
            if let Some(w) = self.external_waker.take() {
                w.resume(self);
            }
        }
    }
}

/// Complete once every child has succeeded, or fail as soon as the first one does (§4.6).
pub struct All<Aw: Awaitable> {
    children: RefCell<Vec<Aw>>,
    settled: RefCell<Vec<bool>>,
    remaining: Cell<usize>,
    failed_index: Cell<Option<usize>>,
    external_waker: Cell<Option<&'static dyn Awaiter>>,
}

impl<Aw: Awaitable + 'static> All<Aw> {
    /// Build and leak an `all(children)` combinator.
    pub fn spawn(children: Vec<Aw>) -> &'static mut Self {
        let remaining = children.len();
        let settled = std::iter::repeat(false).take(children.len()).collect();
        let this = Box::new(All {
            children: RefCell::new(children),
            settled: RefCell::new(settled),
            remaining: Cell::new(remaining),
            failed_index: Cell::new(None),
            external_waker: Cell::new(None),
        });
        let leaked = Box::leak(this);
        leaked.rescan();
        leaked
    }

    /// # Safety
    /// `this` must be the unique `&'static mut` returned by a prior `All::spawn` call.
    pub unsafe fn reclaim(this: &'static mut Self) -> Box<Self> {
        Box::from_raw(this as *mut Self)
    }

    /// The children, for reading each one's result after this combinator is ready.
    pub fn children_mut(&mut self) -> &mut [Aw] {
        self.children.get_mut()
    }

    fn rescan(&self) {
        if self.is_ready() {
            return;
        }
        let mut children = self.children.borrow_mut();
        let mut settled = self.settled.borrow_mut();
        for (idx, child) in children.iter_mut().enumerate() {
            if settled[idx] || !child.is_ready() {
                continue;
            }
            settled[idx] = true;
            self.remaining.set(self.remaining.get() - 1);
            if child.has_error() && self.failed_index.get().is_none() {
                self.failed_index.set(Some(idx));
            }
        }
    }

    fn unsubscribe_all(&self) {
        let mut children = self.children.borrow_mut();
        let settled = self.settled.borrow();
        for (idx, child) in children.iter_mut().enumerate() {
            if !settled[idx] {
                child.set_waker(None);
            }
        }
    }
}

impl<Aw: Awaitable + 'static> AwaitableBase for All<Aw> {
    fn is_ready(&self) -> bool {
        self.failed_index.get().is_some() || self.remaining.get() == 0
    }

    fn has_error(&self) -> bool {
        self.failed_index.get().is_some()
    }

    fn set_waker(&mut self, waker: Option<&'static dyn Awaiter>) {
        match waker {
            Some(w) => {
                self.external_waker.set(Some(w));
                let this: &'static Self = unsafe { &*(self as *const Self) };
                let mut children = this.children.borrow_mut();
                let settled = this.settled.borrow();
                for (idx, child) in children.iter_mut().enumerate() {
                    if !settled[idx] {
                        child.set_waker(Some(this));
                    }
                }
            }
            None => {
                self.external_waker.set(None);
                self.unsubscribe_all();
            }
        }
    }
}

impl<Aw: Awaitable + 'static> Awaitable for All<Aw> {
    type Result = ();

    fn take_result(&mut self) {
        if !AwaitableBase::is_ready(self) || AwaitableBase::has_error(self) {
            contract_violation("All::take_result called while not ready-with-success");
        }
    }

    fn take_error(&mut self) -> Error {
        let idx = self
            .failed_index
            .get()
            .unwrap_or_else(|| contract_violation("All::take_error called before ready-with-error"));
        self.children.get_mut()[idx].take_error()
    }
}

impl<Aw: Awaitable + 'static> Awaiter for All<Aw> {
    fn resume(&self, _who: &dyn AwaitableBase) {
        self.rescan();
        if AwaitableBase::is_ready(self) {
            self.unsubscribe_all();
            if let Some(w) = self.external_waker.take() {
                w.resume(self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{make_completed_task, Task};

    #[test]
    #[should_panic(expected = "any(..) requires at least one child")]
    fn any_over_empty_collection_is_a_contract_violation() {
        Any::<Task<i32>>::spawn(vec![]);
    }

    #[test]
    fn some_zero_completes_synchronously_with_success() {
        let t1: Task<i32> = Task::new();
        let combo = Some::spawn(0, vec![t1]);
        assert!(combo.is_ready());
        assert!(!combo.has_error());
        assert_eq!(combo.take_result(), Vec::<usize>::new());
        unsafe {
            Some::reclaim(combo);
        }
    }

    #[test]
    #[should_panic(expected = "some(k, ..) requires k <= children.len()")]
    fn some_k_greater_than_children_is_a_contract_violation() {
        let t1: Task<i32> = Task::new();
        Some::spawn(2, vec![t1]);
    }

    #[test]
    fn any_completes_on_first_ready_child_precheck() {
        let already_done: Task<i32> = make_completed_task(9);
        let pending: Task<i32> = Task::new();

        let combo = Any::spawn(vec![already_done, pending]);
        assert!(combo.is_ready());
        assert_eq!(combo.take_result(), 0);
        unsafe {
            Any::reclaim(combo);
        }
    }

    #[test]
    fn some_requires_k_successes_before_ready() {
        let mut t1: Task<i32> = Task::new();
        let mut t2: Task<i32> = Task::new();
        let p1 = t1.take_promise();
        let p2 = t2.take_promise();

        let combo = Some::spawn(2, vec![t1, t2]);
        assert!(!combo.is_ready());

        p1.complete(1);
        Awaiter::resume(&*combo, &*combo); // simulate the waker callback a real child would trigger
        assert!(!combo.is_ready());

        p2.complete(2);
        Awaiter::resume(&*combo, &*combo);
        assert!(combo.is_ready());
        assert!(!combo.has_error());
        let mut winners = combo.take_result();
        winners.sort_unstable();
        assert_eq!(winners, vec![0, 1]);

        unsafe {
            Some::reclaim(combo);
        }
    }

    #[test]
    fn all_fails_fast_on_first_error() {
        let mut t1: Task<i32> = Task::new();
        let mut t2: Task<i32> = Task::new();
        let p1 = t1.take_promise();
        let _p2 = t2.take_promise();

        let combo = All::spawn(vec![t1, t2]);
        p1.fail(Error::Allocation);
        Awaiter::resume(&*combo, &*combo);

        assert!(combo.is_ready());
        assert!(combo.has_error());
        assert!(matches!(combo.take_error(), Error::Allocation));

        unsafe {
            All::reclaim(combo);
        }
    }
}
