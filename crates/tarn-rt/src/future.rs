// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-slot result futures.
//!
//! A [`Future`] hands one value from a producer to any number of awaiting
//! consumers. Handles are cheap clones sharing the slot; the value is
//! reclaimed when the last handle drops.
//!
//! Waiting is graduated: an atomic fast-path check, a bounded busy-spin
//! with the CPU's low-power hint, a bounded run of cooperative yields, and
//! only then a condvar block. Most awaited results land within
//! microseconds, so the early tiers usually win and the parking cost is
//! reserved for genuinely long waits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const READY: u8 = 1;

/// Busy-spin iterations before the first yield.
const SPIN_LIMIT: u32 = 128;
/// Cooperative yields before blocking on the condvar.
const YIELD_LIMIT: u32 = 32;

struct Inner<T> {
    state: AtomicU8,
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

/// Shared single-slot result box.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Future::new()
    }
}

impl<T> Future<T> {
    /// A fresh, pending future.
    pub fn new() -> Future<T> {
        Future {
            inner: Arc::new(Inner {
                state: AtomicU8::new(PENDING),
                slot: Mutex::new(None),
                cond: Condvar::new(),
            }),
        }
    }

    /// Fill the slot and wake every waiter.
    ///
    /// Setting twice is not guarded; the second value replaces the first.
    pub fn set(&self, value: T) {
        let mut slot = self.inner.slot.lock().unwrap();
        *slot = Some(value);
        self.inner.state.store(READY, Ordering::Release);
        drop(slot);
        self.inner.cond.notify_all();
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == READY
    }

    /// Run the spin and yield tiers; true if the value arrived during them.
    fn ready_after_fast_tiers(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        for _ in 0..SPIN_LIMIT {
            std::hint::spin_loop();
            if self.is_ready() {
                return true;
            }
        }
        for _ in 0..YIELD_LIMIT {
            std::thread::yield_now();
            if self.is_ready() {
                return true;
            }
        }
        false
    }

    /// Block until the future is ready, without touching the value.
    pub fn wait(&self) {
        if self.ready_after_fast_tiers() {
            return;
        }
        let mut slot = self.inner.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.inner.cond.wait(slot).unwrap();
        }
    }

    /// Block until ready and return the value. Every observer receives it.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.ready_after_fast_tiers();
        let mut slot = self.inner.slot.lock().unwrap();
        loop {
            if let Some(v) = slot.as_ref() {
                return v.clone();
            }
            slot = self.inner.cond.wait(slot).unwrap();
        }
    }

    /// Like [`get`](Future::get) with a deadline; `None` if the value has
    /// not arrived when `timeout` elapses.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        if self.ready_after_fast_tiers() {
            let slot = self.inner.slot.lock().unwrap();
            return slot.as_ref().cloned();
        }
        let mut slot = self.inner.slot.lock().unwrap();
        loop {
            if let Some(v) = slot.as_ref() {
                return Some(v.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timed_out) = self
                .inner
                .cond
                .wait_timeout(slot, deadline - now)
                .unwrap();
            slot = guard;
        }
    }

    /// Block for this future's value, transform it, and hand the result
    /// back as an already-resolved future.
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        T: Clone,
        F: FnOnce(T) -> U,
    {
        let mapped = Future::new();
        mapped.set(f(self.get()));
        mapped
    }
}

/// Block until every future in `futures` is ready and collect the values
/// in slice order.
pub fn wait_all<T: Clone>(futures: &[Future<T>]) -> Vec<T> {
    futures.iter().map(|f| f.get()).collect()
}

/// Block until some future in `futures` is ready and return its index.
/// Polls in a rotated order so no fixed arm is favored. `None` only for an
/// empty slice.
pub fn select<T>(futures: &[Future<T>]) -> Option<usize> {
    let n = futures.len();
    if n == 0 {
        return None;
    }

    let mut rng = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64
        ^ (futures.as_ptr() as u64);

    let mut pause = Duration::from_nanos(100);
    let max_pause = Duration::from_millis(1);
    loop {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        let start = (rng >> 33) as usize % n;
        for i in 0..n {
            let idx = (start + i) % n;
            if futures[idx].is_ready() {
                return Some(idx);
            }
        }
        std::thread::sleep(pause);
        pause = (pause * 2).min(max_pause);
    }
}

/// Block until some future in `futures` is ready and return its value.
/// `None` only for an empty slice.
pub fn race<T: Clone>(futures: &[Future<T>]) -> Option<T> {
    select(futures).map(|idx| futures[idx].get())
}
