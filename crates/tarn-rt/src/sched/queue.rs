// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-worker work queues.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::task::WorkItem;

/// A worker's private queue. Mutex-protected VecDeque.
///
/// Submissions and the owner both work the front, so the owner runs the
/// most recently queued item first; stealers take the oldest item from
/// the back. Both paths share one mutex, which is fine at this queue's
/// contention level since stealers touch it only when their own queue
/// is empty.
pub(crate) struct LocalQueue {
    deque: Mutex<VecDeque<Box<WorkItem>>>,
}

impl LocalQueue {
    pub(crate) fn new() -> LocalQueue {
        LocalQueue {
            deque: Mutex::new(VecDeque::new()),
        }
    }

    /// Push at the front. Unbounded; submission never blocks.
    pub(crate) fn push(&self, item: Box<WorkItem>) {
        self.deque.lock().unwrap().push_front(item);
    }

    /// Pop from the front (owner's fast path).
    pub(crate) fn pop(&self) -> Option<Box<WorkItem>> {
        self.deque.lock().unwrap().pop_front()
    }

    /// Steal a single item from the back (other workers call this).
    pub(crate) fn steal(&self) -> Option<Box<WorkItem>> {
        self.deque.lock().unwrap().pop_back()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deque.lock().unwrap().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.deque.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::Job;

    fn item(tag: u8) -> Box<WorkItem> {
        Box::new(WorkItem {
            job: Some(Job::Run(Box::new(move || {
                let _ = tag;
            }))),
        })
    }

    #[test]
    fn owner_pops_newest_first() {
        let q = LocalQueue::new();
        let (a, b) = (item(1), item(2));
        let (pa, pb) = (&*a as *const WorkItem, &*b as *const WorkItem);
        q.push(a);
        q.push(b);
        assert_eq!(&*q.pop().unwrap() as *const WorkItem, pb);
        assert_eq!(&*q.pop().unwrap() as *const WorkItem, pa);
        assert!(q.pop().is_none());
    }

    #[test]
    fn steal_takes_oldest() {
        let q = LocalQueue::new();
        let (a, b) = (item(1), item(2));
        let pa = &*a as *const WorkItem;
        q.push(a);
        q.push(b);
        assert_eq!(&*q.steal().unwrap() as *const WorkItem, pa);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn steal_from_empty_is_none() {
        let q = LocalQueue::new();
        assert!(q.steal().is_none());
        assert!(q.is_empty());
    }
}
