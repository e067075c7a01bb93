//! A 5 second countdown, driven by a toy run loop — the host-loop half of the picture this
//! crate deliberately doesn't ship (§5: no executor, no I/O reactor). Grounded on CppAsync's
//! `Examples/ex_countdown.cpp` (`Looper` + `asyncDelay`), ported to `spawn_stackful` +
//! `await_awaitable`.
//!
//! Run with `cargo run --example countdown`.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use unitask::async_frame::{await_awaitable, spawn_stackful};
use unitask::config::Config;
use unitask::error::Error;
use unitask::task::{SharedPromise, Task, TaskState};

/// A single-threaded run loop: scheduled closures fire once their deadline has passed, in
/// deadline order. Stands in for a real event loop (Qt/GTK/Tokio's own reactor/...); this
/// crate's core has no opinion on which one a host picks.
struct Looper {
    scheduled: Vec<(Instant, Box<dyn FnOnce()>)>,
}

impl Looper {
    fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Looper {
            scheduled: Vec::new(),
        }))
    }
}

trait LooperExt {
    fn schedule(&self, delay: Duration, action: impl FnOnce() + 'static);
    fn run(&self);
}

impl LooperExt for Rc<RefCell<Looper>> {
    fn schedule(&self, delay: Duration, action: impl FnOnce() + 'static) {
        self.borrow_mut()
            .scheduled
            .push((Instant::now() + delay, Box::new(action)));
    }

    /// Run until nothing is left scheduled. Pops one due action at a time and drops the borrow
    /// before firing it: the fired coroutine may turn around and `schedule` again, which would
    /// otherwise reenter `borrow_mut()` while it's still held.
    fn run(&self) {
        loop {
            let due = {
                let mut inner = self.borrow_mut();
                if inner.scheduled.is_empty() {
                    return;
                }
                let now = Instant::now();
                let idx = inner
                    .scheduled
                    .iter()
                    .position(|(deadline, _)| *deadline <= now);
                match idx {
                    Some(i) => Some(inner.scheduled.remove(i)),
                    None => {
                        let next = inner.scheduled.iter().map(|(d, _)| *d).min().unwrap();
                        drop(inner);
                        thread::sleep(next.saturating_duration_since(Instant::now()));
                        None
                    }
                }
            };
            if let Some((_, action)) = due {
                action();
            }
        }
    }
}

/// A delay task: trivial enough that it doesn't need its own coroutine, just a promise the
/// loop completes once the deadline passes.
fn async_delay(looper: &Rc<RefCell<Looper>>, milliseconds: u64) -> Task<()> {
    let mut task = Task::new();
    let promise: SharedPromise<()> = task.take_promise().share();
    looper.schedule(Duration::from_millis(milliseconds), move || {
        promise.complete(());
    });
    task
}

fn main() {
    let looper = Looper::new();
    let looper_in_body = looper.clone();

    let mut task: Task<()> = spawn_stackful(&Config::new(), move |waker, yielder| {
        let mut n = 5;
        while n > 0 {
            println!("{n}...");
            n -= 1;
            let mut delay = async_delay(&looper_in_body, 1000);
            await_awaitable(waker, &mut delay, || yielder.suspend())?;
        }
        println!("liftoff!");
        Ok::<(), Error>(())
    });

    looper.run();

    assert_eq!(task.state(), TaskState::Completed);
    let _ = task.result();
}
