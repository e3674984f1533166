// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Readiness loop: epoll-backed I/O parking (Linux).
//!
//! No dedicated reactor thread. Idle workers drive the loop with
//! non-blocking `poll` passes; the worker park timeout bounds wake-up
//! latency. Registrations are one-shot: a descriptor fires once, its
//! task is handed back for re-submission, and waiting again means
//! registering again.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use super::task::SchedTask;

/// I/O direction a task is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn to_epoll_events(self) -> u32 {
        let dir = match self {
            Interest::Readable => libc::EPOLLIN,
            Interest::Writable => libc::EPOLLOUT,
        };
        (dir | libc::EPOLLONESHOT) as u32
    }
}

/// Readiness tracker shared by all workers.
pub(crate) struct Reactor {
    epoll_fd: RawFd,
    /// FD → parked task. Entries are consumed when the FD fires.
    registrations: Mutex<HashMap<RawFd, Arc<SchedTask>>>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Reactor> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Reactor {
            epoll_fd,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Register interest in a descriptor on behalf of a parked task.
    ///
    /// Re-registering an FD that is already tracked replaces its task.
    pub(crate) fn register(
        &self,
        fd: RawFd,
        interest: Interest,
        task: Arc<SchedTask>,
    ) -> io::Result<()> {
        let mut regs = self.registrations.lock().unwrap();

        let mut ev = libc::epoll_event {
            events: interest.to_epoll_events(),
            u64: fd as u64,
        };
        let op = if regs.contains_key(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        regs.insert(fd, task);
        Ok(())
    }

    /// Drop interest in a descriptor without waking its task.
    #[cfg(test)]
    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let mut regs = self.registrations.lock().unwrap();
        if regs.remove(&fd).is_some() {
            self.epoll_del(fd)?;
        }
        Ok(())
    }

    /// One non-blocking readiness pass.
    ///
    /// Returns the tasks whose descriptors fired; the caller re-submits
    /// them. Their registrations are consumed here, both in the map and
    /// in the epoll set.
    pub(crate) fn poll(&self) -> io::Result<Vec<Arc<SchedTask>>> {
        const MAX_EVENTS: usize = 64;
        let mut events: [libc::epoll_event; MAX_EVENTS] =
            [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        let n = unsafe { libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new()); // EINTR: retry next pass.
            }
            return Err(err);
        }

        // Collect tasks under the lock; the caller re-submits outside it.
        // Submission takes queue locks and notifies condvars, which must
        // not happen while registrations is held.
        let mut ready = Vec::new();
        {
            let mut regs = self.registrations.lock().unwrap();
            for ev in events.iter().take(n as usize) {
                let fd = ev.u64 as RawFd;
                if let Some(task) = regs.remove(&fd) {
                    // Best effort. A refused DEL must not drop this task
                    // or the ones already collected; the one-shot
                    // registration is disarmed either way.
                    let _ = self.epoll_del(fd);
                    ready.push(task);
                }
            }
        }
        Ok(ready)
    }

    /// Descriptors currently parked.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    fn epoll_del(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // ENOENT / EBADF mean the FD was already closed elsewhere.
            if err.raw_os_error() != Some(libc::ENOENT)
                && err.raw_os_error() != Some(libc::EBADF)
            {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let regs = self.registrations.lock().unwrap();
        for &fd in regs.keys() {
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
        }
        drop(regs);
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// Put a descriptor into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
