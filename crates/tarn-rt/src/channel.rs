// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bounded channels.
//!
//! A fixed-capacity ring buffer with blocking send/recv, shared by any
//! number of producers and consumers. `send` blocks while the buffer is
//! full, `recv` while it is empty; `close` wakes everyone. A closed
//! channel still hands out buffered values until drained, then `recv`
//! reports [`RecvError::Closed`]. Dropping the last half of either side
//! closes the channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum SendError<T> {
    /// Channel closed; the rejected value rides back to the caller.
    #[error("channel closed")]
    Closed(T),
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum RecvError {
    /// Channel closed and drained.
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum TrySendError<T> {
    /// Buffer is full.
    #[error("channel full")]
    Full(T),
    /// Channel closed.
    #[error("channel closed")]
    Closed(T),
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// No message available right now (also the timeout outcome).
    #[error("channel empty")]
    Empty,
    /// Channel closed and drained.
    #[error("channel closed")]
    Closed,
}

struct Ring<T> {
    buf: Box<[Option<T>]>,
    read: usize,
    write: usize,
    len: usize,
    closed: bool,
}

struct Inner<T> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    senders: AtomicUsize,
    receivers: AtomicUsize,
}

impl<T> Inner<T> {
    fn close(&self) {
        let mut ring = self.ring.lock().unwrap();
        ring.closed = true;
        drop(ring);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Create a bounded channel. Capacities below 1 are clamped to 1; this is
/// a buffered ring, not a rendezvous.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let capacity = capacity.max(1);
    let inner = Arc::new(Inner {
        ring: Mutex::new(Ring {
            buf: (0..capacity).map(|_| None).collect(),
            read: 0,
            write: 0,
            len: 0,
            closed: false,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        senders: AtomicUsize::new(1),
        receivers: AtomicUsize::new(1),
    });
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

/// Sending half; clone for multiple producers.
pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Sender<T> {
    /// Blocking send. If the channel closes while this call is blocked on
    /// a full buffer, nothing is enqueued and the value comes back in the
    /// error.
    pub fn send(&self, val: T) -> Result<(), SendError<T>> {
        let mut ring = self.inner.ring.lock().unwrap();
        while ring.len == ring.buf.len() && !ring.closed {
            ring = self.inner.not_full.wait(ring).unwrap();
        }
        if ring.closed {
            return Err(SendError::Closed(val));
        }
        let w = ring.write;
        ring.buf[w] = Some(val);
        ring.write = (w + 1) % ring.buf.len();
        ring.len += 1;
        drop(ring);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking send attempt.
    pub fn try_send(&self, val: T) -> Result<(), TrySendError<T>> {
        let mut ring = self.inner.ring.lock().unwrap();
        if ring.closed {
            return Err(TrySendError::Closed(val));
        }
        if ring.len == ring.buf.len() {
            return Err(TrySendError::Full(val));
        }
        let w = ring.write;
        ring.buf[w] = Some(val);
        ring.write = (w + 1) % ring.buf.len();
        ring.len += 1;
        drop(ring);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Close the channel and wake all blocked senders and receivers.
    /// Repeating is harmless.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.ring.lock().unwrap().closed
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.inner.senders.fetch_add(1, Ordering::SeqCst);
        Sender {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.inner.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.close();
        }
    }
}

/// Receiving half; clone for multiple consumers.
pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Receiver<T> {
    /// Blocking receive. Buffered values drain out even after close; a
    /// closed and drained channel reports [`RecvError::Closed`].
    pub fn recv(&self) -> Result<T, RecvError> {
        let mut ring = self.inner.ring.lock().unwrap();
        while ring.len == 0 && !ring.closed {
            ring = self.inner.not_empty.wait(ring).unwrap();
        }
        match Self::pop(&mut ring) {
            Some(val) => {
                drop(ring);
                self.inner.not_full.notify_one();
                Ok(val)
            }
            None => Err(RecvError::Closed),
        }
    }

    /// Non-blocking receive attempt.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut ring = self.inner.ring.lock().unwrap();
        match Self::pop(&mut ring) {
            Some(val) => {
                drop(ring);
                self.inner.not_full.notify_one();
                Ok(val)
            }
            None if ring.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Receive with a deadline. [`TryRecvError::Empty`] reports a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, TryRecvError> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.inner.ring.lock().unwrap();
        loop {
            if let Some(val) = Self::pop(&mut ring) {
                drop(ring);
                self.inner.not_full.notify_one();
                return Ok(val);
            }
            if ring.closed {
                return Err(TryRecvError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TryRecvError::Empty);
            }
            let (guard, _) = self
                .inner
                .not_empty
                .wait_timeout(ring, deadline - now)
                .unwrap();
            ring = guard;
        }
    }

    /// Close the channel and wake all blocked senders and receivers.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.ring.lock().unwrap().closed
    }

    /// Messages currently buffered.
    pub fn len(&self) -> usize {
        self.inner.ring.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(ring: &mut Ring<T>) -> Option<T> {
        if ring.len == 0 {
            return None;
        }
        let val = ring.buf[ring.read].take();
        ring.read = (ring.read + 1) % ring.buf.len();
        ring.len -= 1;
        val
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.inner.receivers.fetch_add(1, Ordering::SeqCst);
        Receiver {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if self.inner.receivers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.close();
        }
    }
}
