// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Virtual-memory backed coroutine stacks.
//!
//! Each stack is one anonymous private mapping: a low guard page that stays
//! inaccessible and a usable span above it. The mapping carries
//! `MAP_NORESERVE`, so the multi-megabyte ceiling costs address space only;
//! physical pages are committed as the stack grows down into them.
//!
//! A canary word sits at the lowest usable address. Code that overruns the
//! stack either faults on the guard page or tramples the canary; the
//! engine checks the canary after every resume.

use std::io;
use std::ptr;

use crate::config;

/// Sentinel written at the stack floor.
const CANARY: u64 = 0x7461_726E_5f73_746b; // "tarn_stk"

/// Smallest usable stack the engine will map, in pages.
const MIN_STACK_PAGES: usize = 4;

pub(crate) struct CoroStack {
    base: *mut u8,
    total: usize,
    usable: usize,
}

// The mapping is exclusively owned; it moves with the coroutine that owns it.
unsafe impl Send for CoroStack {}

impl CoroStack {
    /// Map a stack with at least `usable` bytes above a one-page guard.
    pub(crate) fn new(usable: usize) -> io::Result<CoroStack> {
        let page = config::page_size();
        let usable = config::round_to_pages(usable).max(MIN_STACK_PAGES * page);
        let total = usable + page;

        // Reserve the whole span inaccessible, then open up everything
        // above the guard page.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = base as *mut u8;

        let rc = unsafe {
            libc::mprotect(
                base.add(page) as *mut libc::c_void,
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(base as *mut libc::c_void, total);
            }
            return Err(err);
        }

        let stack = CoroStack {
            base,
            total,
            usable,
        };
        unsafe {
            ptr::write(stack.floor() as *mut u64, CANARY);
        }
        Ok(stack)
    }

    /// High end of the usable span; the initial stack pointer.
    pub(crate) fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.total) }
    }

    /// Lowest usable address, just above the guard page.
    fn floor(&self) -> *mut u8 {
        unsafe { self.base.add(self.total - self.usable) }
    }

    pub(crate) fn usable_len(&self) -> usize {
        self.usable
    }

    /// False once the stack has grown down over the floor word.
    pub(crate) fn canary_intact(&self) -> bool {
        unsafe { ptr::read_volatile(self.floor() as *const u64) == CANARY }
    }
}

impl Drop for CoroStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total);
        }
    }
}
