//! Allocator plumbing, provided as a standalone facility for host code.
//!
//! This is a small, stable-Rust-friendly trait rather than `core::alloc::Allocator` (which
//! requires the nightly `allocator_api` feature). It is deliberately *not* threaded through
//! `Task`/`AsyncFrame`/the combinators — those are built on `Rc`/`Box`, and stable Rust has no way
//! to parameterize either over a custom allocator without that same unstable feature. A host that
//! spawns many short-lived operations sharing one region of memory (e.g. per-request scratch
//! buffers behind an I/O awaitable) can still route those buffers through an [`Arena`] instead of
//! the [`Global`] allocator; the core types just aren't aware of which one is in use.

use crate::error::Error;
use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::ptr::NonNull;

/// A source of heap storage for long-lived async objects.
///
/// Mirrors the allocator-threading described in CppAsync's `util/Arena.h` /
/// `util/AllocElementPtr.h`: most callers use the stateless default, arena users share one
/// pre-reserved region across many short-lived tasks.
pub trait Allocator {
    /// Allocate storage matching `layout`, or report [`Error::Allocation`] on failure.
    ///
    /// # Safety
    /// The returned pointer must be deallocated exactly once via [`Allocator::deallocate`] with
    /// an identical layout, or leaked intentionally.
    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error>;

    /// Release storage previously returned by [`Allocator::allocate`].
    ///
    /// # Safety
    /// `ptr`/`layout` must match a prior, not-yet-deallocated call to `allocate`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-wide global allocator, used when no custom allocator is supplied.
///
/// Like `Vec`/`Box`, this aborts on OOM rather than returning [`Error::Allocation`] — that
/// failure mode is only interceptable through the unstable `allocator_api`, which this crate
/// deliberately avoids (see `DESIGN.md`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

impl Allocator for Global {
    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        let ptr = alloc(layout);
        NonNull::new(ptr).ok_or(Error::Allocation)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// A bump allocator over a single pre-reserved region.
///
/// Individual `deallocate` calls are no-ops: the whole region is released at once when the
/// `Arena` itself is dropped. This matches the usage pattern in CppAsync's `Arena.h` — short
/// lived tasks that all die together (e.g. one request's worth of combinators) share one
/// allocation instead of round-tripping through the global allocator per task.
pub struct Arena {
    buf: NonNull<u8>,
    capacity: usize,
    offset: Cell<usize>,
    layout: Layout,
}

impl Arena {
    /// Reserve a new arena of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let layout = Layout::from_size_align(capacity.max(1), std::mem::align_of::<usize>())
            .map_err(|_| Error::Allocation)?;
        let buf = unsafe {
            let ptr = alloc(layout);
            NonNull::new(ptr).ok_or(Error::Allocation)?
        };
        Ok(Arena {
            buf,
            capacity,
            offset: Cell::new(0),
            layout,
        })
    }

    /// Bytes already handed out.
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Total capacity of the arena.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Allocator for Arena {
    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        let start = self.offset.get();
        let base = self.buf.as_ptr() as usize;
        let aligned = (base + start + layout.align() - 1) & !(layout.align() - 1);
        let aligned_offset = aligned - base;
        let end = aligned_offset.checked_add(layout.size()).ok_or(Error::Allocation)?;

        if end > self.capacity {
            return Err(Error::Allocation);
        }

        self.offset.set(end);
        Ok(NonNull::new_unchecked(aligned as *mut u8))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // Bump allocator: individual frees are no-ops, the whole arena is released on drop.
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.buf.as_ptr(), self.layout);
        }
    }
}
