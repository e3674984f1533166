// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Stackful coroutines.
//!
//! A [`Coroutine`] owns a private call stack and can suspend at any call
//! depth via [`tarn_yield`], returning control to whoever called
//! [`Coroutine::resume`]. This is what lets generated code park deep inside
//! user logic (e.g. awaiting I/O readiness) without unwinding.
//!
//! Components:
//! - `arch`  — per-architecture context switch (naked asm)
//! - `stack` — mmap-backed stacks with guard page and overflow canary
//!
//! Control blocks are recycled through a bounded lock-free pool; stacks are
//! not pooled and go back to the OS on drop. The engine keeps a
//! process-wide live-instance counter, visible through [`live_count`].

mod arch;
mod stack;

use std::cell::Cell;
use std::io;
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_queue::ArrayQueue;
use once_cell::sync::Lazy;

use crate::config;
use arch::Context;
use stack::CoroStack;

/// Recycled control blocks; capacity bounds reuse, overflow allocates fresh.
const CTRL_POOL_CAP: usize = 4096;

static CTRL_POOL: Lazy<ArrayQueue<Box<CoroInner>>> =
    Lazy::new(|| ArrayQueue::new(CTRL_POOL_CAP));

/// Coroutines alive in this process. Never negative.
static LIVE: AtomicI64 = AtomicI64::new(0);

thread_local! {
    static CURRENT: Cell<*mut CoroInner> = const { Cell::new(ptr::null_mut()) };
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CoroStatus {
    Suspended,
    Running,
    Done,
}

struct CoroInner {
    status: CoroStatus,
    /// Saved state of the coroutine while it is suspended.
    ctx: Context,
    /// Saved state of the resumer while the coroutine runs.
    ret: Context,
    entry: Option<Box<dyn FnOnce() + Send + 'static>>,
    stack: Option<CoroStack>,
}

impl CoroInner {
    fn vacant() -> CoroInner {
        CoroInner {
            status: CoroStatus::Done,
            ctx: Context::default(),
            ret: Context::default(),
            entry: None,
            stack: None,
        }
    }
}

/// Opaque identity of a coroutine, comparable against [`current`].
///
/// Identities can recur after a coroutine is destroyed and its control
/// block is recycled.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CoroId(usize);

/// A stackful coroutine.
///
/// `resume` drives it; it runs until the next [`tarn_yield`] or until the
/// entry function returns. Dropping a coroutine that has not finished frees
/// its stack without unwinding it: values owned by frames still on that
/// stack are leaked, not dropped. The runtime only drops unfinished
/// coroutines when shutdown abandons parked work.
pub struct Coroutine {
    inner: ManuallyDrop<Box<CoroInner>>,
}

impl Coroutine {
    /// Create a coroutine around `f` with the configured stack ceiling.
    pub fn new<F>(f: F) -> io::Result<Coroutine>
    where
        F: FnOnce() + Send + 'static,
    {
        Coroutine::with_stack_size(f, config::coro_stack_size())
    }

    /// Create a coroutine with an explicit stack ceiling in bytes.
    pub fn with_stack_size<F>(f: F, stack_bytes: usize) -> io::Result<Coroutine>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = CoroStack::new(stack_bytes)?;
        let top = stack.top();

        let mut inner = CTRL_POOL
            .pop()
            .unwrap_or_else(|| Box::new(CoroInner::vacant()));
        inner.status = CoroStatus::Suspended;
        inner.entry = Some(Box::new(f));
        inner.stack = Some(stack);

        let arg = &mut *inner as *mut CoroInner as usize;
        unsafe {
            arch::init_context(&mut inner.ctx, top, coro_shim as *const () as usize, arg);
        }

        LIVE.fetch_add(1, Ordering::SeqCst);
        Ok(Coroutine {
            inner: ManuallyDrop::new(inner),
        })
    }

    /// Transfer control into the coroutine until it yields or finishes.
    ///
    /// Returns `true` while the coroutine is still alive (it yielded and
    /// can be resumed again), `false` once it is done. Resuming a finished
    /// coroutine is a no-op returning `false`.
    pub fn resume(&mut self) -> bool {
        let inner: &mut CoroInner = &mut self.inner;
        if inner.status != CoroStatus::Suspended {
            return false;
        }
        inner.status = CoroStatus::Running;

        let me = inner as *mut CoroInner;
        let prev = CURRENT.with(|c| c.replace(me));
        unsafe {
            arch::switch(&mut inner.ret, &inner.ctx);
        }
        CURRENT.with(|c| c.set(prev));

        // A clobbered floor word means the stack ran out without faulting
        // on the guard page. The coroutine is dead either way.
        if inner.status != CoroStatus::Done {
            let overflowed = inner
                .stack
                .as_ref()
                .is_some_and(|s| !s.canary_intact());
            if overflowed {
                let usable = inner.stack.as_ref().map_or(0, |s| s.usable_len());
                eprintln!(
                    "tarn-rt: coroutine stack overflow ({} byte stack); \
                     set {}=<bytes> to raise the ceiling",
                    usable,
                    config::CORO_STACK_ENV,
                );
                inner.status = CoroStatus::Done;
                return false;
            }
        }

        inner.status == CoroStatus::Suspended
    }

    /// True once the coroutine has run to completion (or died on overflow).
    pub fn is_done(&self) -> bool {
        self.inner.status == CoroStatus::Done
    }

    /// Identity of this coroutine, for comparison with [`current`].
    pub fn id(&self) -> CoroId {
        let inner: &CoroInner = &self.inner;
        CoroId(inner as *const CoroInner as usize)
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        let mut inner = unsafe { ManuallyDrop::take(&mut self.inner) };
        inner.entry = None;
        inner.stack = None;
        inner.status = CoroStatus::Done;
        LIVE.fetch_sub(1, Ordering::SeqCst);
        // Full pool drops the block for real.
        let _ = CTRL_POOL.push(inner);
    }
}

/// Suspend the coroutine currently executing on this thread, returning
/// control to its resumer. A no-op when called outside any coroutine.
pub fn tarn_yield() {
    let cur = CURRENT.with(|c| c.get());
    if cur.is_null() {
        return;
    }
    unsafe {
        (*cur).status = CoroStatus::Suspended;
        arch::switch(&mut (*cur).ctx, &(*cur).ret);
    }
    // Back from the next resume; the resumer already marked us Running.
}

/// Identity of the coroutine executing on this thread, or `None` when
/// called from ordinary thread context.
pub fn current() -> Option<CoroId> {
    let p = CURRENT.with(|c| c.get());
    if p.is_null() {
        None
    } else {
        Some(CoroId(p as usize))
    }
}

/// Number of coroutines currently alive in this process.
pub fn live_count() -> i64 {
    LIVE.load(Ordering::SeqCst)
}

/// Entry shim running on the coroutine's own stack. Never returns to the
/// trampoline: the final switch hands control back to the last resumer.
unsafe extern "C" fn coro_shim(arg: usize) {
    let inner = arg as *mut CoroInner;
    if let Some(f) = (*inner).entry.take() {
        // Panics stop at the coroutine boundary; unwinding into the
        // trampoline would abort the process.
        let _ = panic::catch_unwind(AssertUnwindSafe(f));
    }
    (*inner).status = CoroStatus::Done;
    arch::switch(&mut (*inner).ctx, &(*inner).ret);
    // Not reached: a Done coroutine is never switched into again.
}
