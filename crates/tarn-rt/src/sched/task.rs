// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work items and scheduled coroutine state.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crossbeam_queue::ArrayQueue;

use crate::coro::Coroutine;

/// Max recycled work items held per worker.
const ITEM_POOL_CAP: usize = 256;

/// One unit of scheduler work.
pub(crate) enum Job {
    /// Run a closure to completion on the worker thread.
    Run(Box<dyn FnOnce() + Send + 'static>),
    /// Resume a suspended coroutine.
    Resume(Arc<SchedTask>),
}

/// Queue entry. Boxed so entries recycle through the per-worker pools
/// without moving the payload.
pub(crate) struct WorkItem {
    pub(crate) job: Option<Job>,
}

/// Per-worker free-list of recycled work items.
///
/// Lock-free and fixed-capacity; exhaustion falls back to a fresh
/// allocation, overflow on release just drops the box. An item stolen
/// from another worker's queue is released into the *executing*
/// worker's pool, so pool sizes drift under steal-heavy load. That is
/// deliberate; do not route items back to their origin.
pub(crate) struct ItemPool {
    free: ArrayQueue<Box<WorkItem>>,
}

impl ItemPool {
    pub(crate) fn new() -> ItemPool {
        ItemPool {
            free: ArrayQueue::new(ITEM_POOL_CAP),
        }
    }

    /// Take a recycled item or allocate a fresh one.
    pub(crate) fn acquire(&self, job: Job) -> Box<WorkItem> {
        match self.free.pop() {
            Some(mut item) => {
                item.job = Some(job);
                item
            }
            None => Box::new(WorkItem { job: Some(job) }),
        }
    }

    /// Return an item after execution.
    pub(crate) fn release(&self, mut item: Box<WorkItem>) {
        item.job = None;
        let _ = self.free.push(item);
    }
}

/// A coroutine under scheduler management.
///
/// `parked` marks the coroutine's next yield as I/O-driven: the worker
/// latches the flag (`swap(false)`) while it still holds the coroutine
/// lock after a resume, and skips re-enqueueing when it was set. The
/// reactor re-submits the task when the awaited descriptor fires but
/// never writes the flag. The latch must stay inside the lock: once it
/// drops, another worker can drive the next resume through a fresh
/// park, and a late swap here would consume that park and wake a task
/// still waiting on its descriptor.
pub(crate) struct SchedTask {
    pub(crate) coro: Mutex<Coroutine>,
    pub(crate) parked: AtomicBool,
}

impl SchedTask {
    pub(crate) fn new(coro: Coroutine) -> SchedTask {
        SchedTask {
            coro: Mutex::new(coro),
            parked: AtomicBool::new(false),
        }
    }

    /// Mark the coroutine's next yield as I/O-driven.
    pub(crate) fn park(&self) {
        self.parked.store(true, std::sync::atomic::Ordering::Release);
    }

    /// Undo [`park`](Self::park) before the yield happens (registration
    /// failed, nothing will fire).
    pub(crate) fn unpark(&self) {
        self.parked.store(false, std::sync::atomic::Ordering::Release);
    }
}
