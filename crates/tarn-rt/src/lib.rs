// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tarn runtime library.
//!
//! Execution layer for Tarn-generated programs: stackful coroutines on
//! a work-stealing worker pool, with futures, task groups, and bounded
//! channels for coordination and an epoll readiness loop for I/O parks.
//!
//! Components:
//! - sched   — worker pool, submission, I/O readiness, task groups
//! - coro    — stackful coroutines (create/resume/yield)
//! - future  — single write-once result cells
//! - group   — join points over cohorts of spawned work
//! - channel — bounded producer/consumer handoff
//! - config  — environment overrides (stack ceiling, worker count)

pub mod channel;
pub mod config;
pub mod coro;
pub mod future;
pub mod group;
pub mod sched;

pub use coro::{current, live_count, tarn_yield, CoroId, Coroutine};
pub use future::Future;
pub use group::{Cancelled, GroupId, GroupRegistry};
pub use sched::{set_nonblocking, wait_readable, wait_writable, JoinError, Scheduler};
