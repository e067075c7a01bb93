//! Composable single-threaded asynchronous tasks, coroutines and combinators.
//!
//! This crate is a Rust port of CppAsync's core runtime: a `Task`/`Promise` pair for the result
//! of an asynchronous operation (§4.3), two coroutine flavors for writing the body of one
//! (resume-point-encoded and stack-preserving, §4.4), the glue that drives a coroutine and feeds
//! its result to a promise (§4.5), and `any`/`some`/`all` combinators for waiting on several
//! operations at once (§4.6).
//!
//! Everything here is `!Send`/`!Sync` by design — a `Task` is driven by whichever single thread
//! created it, the same way CppAsync's own core is single-threaded. There is no executor, no
//! timer wheel and no I/O reactor in this crate; those are host concerns, built on top of the
//! primitives here (see `demos/` for a worked example).
//!
//! # Layout
//! - [`error`] — the shared `Error` type and `Result` alias.
//! - [`config`] — crate-wide configuration, threaded in explicitly rather than read from the
//!   environment.
//! - [`alloc`] — a stable-Rust allocator trait (`Global`, arena-backed `Arena`) for hosts that
//!   want to place their own long-lived buffers off the global heap; not threaded through the
//!   `Rc`/`Box`-based core types themselves (see `DESIGN.md`).
//! - [`cell`] — `ResultCell`, the "value or error, exactly once" storage used by `Task`.
//! - [`awaitable`] — the `AwaitableBase`/`Awaitable` probe interface every suspendable value
//!   implements.
//! - [`task`] — `Task`, `Promise`, `SharedPromise`.
//! - [`coroutine`] — `Coroutine`, and the `stackless`/`stackful` implementations of it.
//! - [`async_frame`] — binds a coroutine to a promise and drives it.
//! - [`combinators`] — `any`, `some`, `all`.

pub mod alloc;
pub mod async_frame;
pub mod awaitable;
pub mod cell;
pub mod combinators;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod task;

pub use awaitable::{Awaitable, AwaitableBase, Awaiter};
pub use config::Config;
pub use coroutine::{Coroutine, CoroutineState};
pub use error::{Error, Result};
pub use task::{Promise, SharedPromise, Task, TaskState};
