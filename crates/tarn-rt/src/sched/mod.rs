// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduling: worker pool, queues, and the I/O readiness loop.
//!
//! Stackful coroutines and plain closures on a work-stealing pool of
//! OS threads, with epoll readiness as the re-entry path for parked
//! work.
//!
//! Components:
//! - `task`      — Work items, per-worker item pools, scheduled coroutine state
//! - `queue`     — Per-worker LIFO queues with steal-from-the-back
//! - `reactor`   — One-shot epoll registrations, polled by idle workers
//! - `scheduler` — Worker threads, submission, groups, idle tracking

mod queue;
mod reactor;
mod scheduler;
mod task;

pub use reactor::set_nonblocking;
pub use scheduler::{wait_readable, wait_writable, JoinError, Scheduler};
