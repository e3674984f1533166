// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Environment-driven runtime settings.
//!
//! Two knobs, both optional:
//! - `TARN_CORO_STACK`: coroutine stack ceiling in bytes, default 8 MiB.
//!   Absent, unparseable, or non-positive values fall back to the default.
//! - `TARN_WORKERS`: scheduler worker count used when the embedder passes
//!   no explicit count.

use std::str::FromStr;

use once_cell::sync::Lazy;

/// Environment variable naming the coroutine stack ceiling in bytes.
pub const CORO_STACK_ENV: &str = "TARN_CORO_STACK";

/// Environment variable naming the scheduler worker count.
pub const WORKERS_ENV: &str = "TARN_WORKERS";

/// Default virtual stack ceiling per coroutine.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Parse `key` from the environment, falling back to `default` when the
/// variable is absent or does not parse as `T`.
pub(crate) fn env_get<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// Coroutine stack ceiling, read from the environment once per process and
/// rounded up to page granularity.
pub fn coro_stack_size() -> usize {
    static SIZE: Lazy<usize> = Lazy::new(|| {
        let raw: i64 = env_get(CORO_STACK_ENV, DEFAULT_STACK_SIZE as i64);
        let bytes = if raw <= 0 {
            DEFAULT_STACK_SIZE
        } else {
            raw as usize
        };
        round_to_pages(bytes)
    });
    *SIZE
}

/// Worker count fallback chain: `TARN_WORKERS` if set and non-zero, else
/// `available_parallelism`, else 4.
pub fn default_worker_count() -> usize {
    let from_env: usize = env_get(WORKERS_ENV, 0);
    if from_env > 0 {
        return from_env;
    }
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// System page size, queried once.
pub(crate) fn page_size() -> usize {
    static PAGE: Lazy<usize> = Lazy::new(|| {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 {
            n as usize
        } else {
            4096
        }
    });
    *PAGE
}

/// Round `bytes` up to a whole number of pages (at least one).
pub(crate) fn round_to_pages(bytes: usize) -> usize {
    let page = page_size();
    bytes.max(1).div_ceil(page).saturating_mul(page)
}
