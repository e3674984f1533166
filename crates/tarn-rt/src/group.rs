// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task-group join points.
//!
//! A group tracks a cohort of spawned work: register spawns against a
//! handle, have each finished unit call `complete`, and `wait` blocks until
//! the whole cohort finished or the group was cancelled. Cancellation only
//! unblocks waiters; running work is never interrupted.
//!
//! State machine per group: `Active -> Done` when the completion count
//! reaches the registered spawn count, or `Active -> Cancelled`; there is
//! no way out of a terminal state.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use thiserror::Error;

/// Fixed number of group slots; handles wrap around past this bound.
pub const MAX_GROUPS: usize = 1024;

/// Handle to one task group.
///
/// Handles index a fixed table of [`MAX_GROUPS`] slots that is reused
/// cyclically: a handle held across 1024 subsequent `create` calls aliases
/// the slot of a newer group. Slots are fully reset on reuse, so a stale
/// handle observes that newer group, never junk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GroupId(u32);

/// Outcome of waiting on a cancelled group.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("task group cancelled")]
pub struct Cancelled;

#[derive(Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Active,
    Done,
    Cancelled,
}

struct GroupSlot {
    spawns: AtomicU32,
    completed: AtomicU32,
    state: Mutex<GroupState>,
    cond: Condvar,
}

impl GroupSlot {
    fn vacant() -> GroupSlot {
        GroupSlot {
            spawns: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            state: Mutex::new(GroupState::Done),
            cond: Condvar::new(),
        }
    }
}

/// Fixed-size table of task groups.
pub struct GroupRegistry {
    slots: Vec<GroupSlot>,
    next_id: AtomicUsize,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        GroupRegistry::new()
    }
}

impl GroupRegistry {
    pub fn new() -> GroupRegistry {
        GroupRegistry {
            slots: (0..MAX_GROUPS).map(|_| GroupSlot::vacant()).collect(),
            next_id: AtomicUsize::new(0),
        }
    }

    fn slot(&self, id: GroupId) -> &GroupSlot {
        // In bounds by construction: ids are only minted modulo MAX_GROUPS.
        &self.slots[id.0 as usize]
    }

    /// Allocate the next slot (cyclically) and reset it to `Active`.
    pub fn create(&self) -> GroupId {
        let idx = self.next_id.fetch_add(1, Ordering::SeqCst) % MAX_GROUPS;
        let slot = &self.slots[idx];
        let mut state = slot.state.lock().unwrap();
        slot.spawns.store(0, Ordering::SeqCst);
        slot.completed.store(0, Ordering::SeqCst);
        *state = GroupState::Active;
        GroupId(idx as u32)
    }

    /// Register `n` more spawns against the group. Callers must register
    /// before waiting, or `wait` can observe an empty cohort and return
    /// early.
    pub fn add_spawns(&self, id: GroupId, n: u32) {
        self.slot(id).spawns.fetch_add(n, Ordering::SeqCst);
    }

    /// Record one finished spawn; wakes waiters when the cohort is done.
    pub fn complete(&self, id: GroupId) {
        let slot = self.slot(id);
        let done = slot.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if done >= slot.spawns.load(Ordering::SeqCst) {
            let mut state = slot.state.lock().unwrap();
            if *state == GroupState::Active {
                *state = GroupState::Done;
            }
            drop(state);
            slot.cond.notify_all();
        }
    }

    /// Block until every registered spawn completed, or the group was
    /// cancelled.
    pub fn wait(&self, id: GroupId) -> Result<(), Cancelled> {
        let slot = self.slot(id);
        let mut state = slot.state.lock().unwrap();
        loop {
            match *state {
                GroupState::Cancelled => return Err(Cancelled),
                GroupState::Done => return Ok(()),
                GroupState::Active => {
                    let done = slot.completed.load(Ordering::SeqCst);
                    if done >= slot.spawns.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    state = slot.cond.wait(state).unwrap();
                }
            }
        }
    }

    /// Cancel the group: waiters wake with [`Cancelled`]; running work is
    /// not stopped. Harmless on an already-terminal group.
    pub fn cancel(&self, id: GroupId) {
        let slot = self.slot(id);
        let mut state = slot.state.lock().unwrap();
        if *state == GroupState::Active {
            *state = GroupState::Cancelled;
        }
        drop(state);
        slot.cond.notify_all();
    }

    /// True once the group was cancelled. Spawned work can poll this to
    /// stop early; the runtime never forces it to.
    pub fn is_cancelled(&self, id: GroupId) -> bool {
        *self.slot(id).state.lock().unwrap() == GroupState::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_after_all_completions() {
        let reg = Arc::new(GroupRegistry::new());
        let id = reg.create();
        reg.add_spawns(id, 5);

        let mut workers = Vec::new();
        for i in 0..5 {
            let reg = reg.clone();
            workers.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(2 * (i + 1)));
                reg.complete(id);
            }));
        }

        assert_eq!(reg.wait(id), Ok(()));
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn cancel_before_last_completion_unblocks_wait() {
        let reg = Arc::new(GroupRegistry::new());
        let id = reg.create();
        reg.add_spawns(id, 5);
        for _ in 0..4 {
            reg.complete(id);
        }

        let canceller = {
            let reg = reg.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                reg.cancel(id);
            })
        };

        assert_eq!(reg.wait(id), Err(Cancelled));
        assert!(reg.is_cancelled(id));
        canceller.join().unwrap();

        // The fifth completion after cancel stays harmless and the group
        // stays cancelled.
        reg.complete(id);
        assert_eq!(reg.wait(id), Err(Cancelled));
    }

    #[test]
    fn wait_on_empty_cohort_returns_immediately() {
        let reg = GroupRegistry::new();
        let id = reg.create();
        assert_eq!(reg.wait(id), Ok(()));
    }

    #[test]
    fn wait_after_done_is_immediate() {
        let reg = GroupRegistry::new();
        let id = reg.create();
        reg.add_spawns(id, 1);
        reg.complete(id);
        assert_eq!(reg.wait(id), Ok(()));
        assert_eq!(reg.wait(id), Ok(()));
    }

    #[test]
    fn cancel_is_idempotent() {
        let reg = GroupRegistry::new();
        let id = reg.create();
        reg.add_spawns(id, 1);
        reg.cancel(id);
        reg.cancel(id);
        assert_eq!(reg.wait(id), Err(Cancelled));
    }

    #[test]
    fn cancel_after_done_does_not_rewrite_outcome() {
        let reg = GroupRegistry::new();
        let id = reg.create();
        reg.add_spawns(id, 1);
        reg.complete(id);
        assert_eq!(reg.wait(id), Ok(()));
        reg.cancel(id);
        assert_eq!(reg.wait(id), Ok(()));
    }

    #[test]
    fn handles_wrap_around_the_table() {
        let reg = GroupRegistry::new();
        let first = reg.create();
        for _ in 0..MAX_GROUPS - 1 {
            reg.create();
        }
        let wrapped = reg.create();
        assert_eq!(wrapped, first);
    }

    #[test]
    fn concurrent_completions_release_one_waiter() {
        let reg = Arc::new(GroupRegistry::new());
        let id = reg.create();
        reg.add_spawns(id, 8);

        let waiter = {
            let reg = reg.clone();
            thread::spawn(move || reg.wait(id))
        };

        let mut workers = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            workers.push(thread::spawn(move || reg.complete(id)));
        }
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}
