// SPDX-License-Identifier: GPL-2.0-only

//! # workqueue-common
//!
//! Shared types for work-queue controller <-> backend communication.
//!
//! This crate defines the wire-shaped types that cross the pipe transport
//! and the backend boundary. `WorkItem` is `#[repr(C)]` so its size is
//! predictable and stays within the platform's atomic-write bound.
//!
//! ## Design Principles
//!
//! - **No payload larger than PIPE_BUF**: `WorkItem` must fit in one atomic
//!   pipe write.
//! - **Opaque argument**: the work function receives a pointer-sized token,
//!   never a borrowed reference — the queue has no notion of item lifetime.

pub mod config;

use thiserror::Error;

/// A unit of work: a function pointer plus an opaque, pointer-sized argument.
///
/// `func` is invoked as `func(worker_id, arg)` by exactly one worker.
pub type WorkFn = fn(i64, usize);

/// One queued work item, transferred atomically through the pipe.
///
/// Must fit within the platform's atomic-write bound (`PIPE_BUF`); see
/// [`config::ATOMIC_WRITE_FLOOR`].
#[repr(C)]
#[derive(Clone, Copy)]
pub struct WorkItem {
    pub func: WorkFn,
    pub arg: usize,
}

// POSIX guarantees PIPE_BUF >= 512 on every conforming system, so this
// compile-time bound holds regardless of the runtime-queried atomic-write
// bound used by the pipe transport.
const _: () = assert!(
    core::mem::size_of::<WorkItem>() <= config::ATOMIC_WRITE_FLOOR,
    "WorkItem must fit within the POSIX-guaranteed PIPE_BUF floor"
);

/// Live snapshot of a queue's worker counters.
///
/// `available <= current <= max_workers` holds at every lock release.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Idle workers, ready to pick up the next item.
    pub available: u32,
    /// Total live workers (idle + busy).
    pub current: u32,
    /// Monotonic: once true, stays true for the queue's lifetime.
    pub shutdown: bool,
}

impl Stat {
    /// `available == current`: no worker is between `busy` and `idle`.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.available == self.current
    }
}

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the work-queue controller and its backends.
#[derive(Error, Debug)]
pub enum Error {
    /// Null queue, null work function, or other caller-supplied nonsense.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Backend name passed to `init` does not match a registered backend.
    #[error("unknown backend: {0}")]
    InvalidBackend(String),

    /// `wait` was called without the caller holding the queue lock.
    #[error("workqueue not locked")]
    NotLocked,

    /// Pipe creation, configuration, read, or write failed.
    #[error("pipe I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A condition wait elapsed without being signalled.
    #[error("timed out waiting for completion")]
    Timeout,

    /// Backend-specific allocation or primitive-initialization failure.
    #[error("backend initialization failed: {0}")]
    BackendInit(String),

    /// Any other failure from the underlying OS primitive, propagated
    /// verbatim (errno, signal setup, fork, mmap, ...).
    #[error("system error: {0}")]
    SystemError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_item_fits_atomic_write_floor() {
        assert!(core::mem::size_of::<WorkItem>() <= config::ATOMIC_WRITE_FLOOR);
    }

    #[test]
    fn stat_idle_detection() {
        let st = Stat {
            available: 3,
            current: 3,
            shutdown: false,
        };
        assert!(st.is_idle());

        let st = Stat {
            available: 1,
            current: 3,
            shutdown: false,
        };
        assert!(!st.is_idle());
    }

    #[test]
    fn stat_default_is_empty_and_idle() {
        let st = Stat::default();
        assert_eq!(st.available, 0);
        assert_eq!(st.current, 0);
        assert!(!st.shutdown);
        assert!(st.is_idle());
    }
}
