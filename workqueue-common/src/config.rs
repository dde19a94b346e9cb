// SPDX-License-Identifier: GPL-2.0-only

//! Tunable defaults and fixed protocol constants.

/// Default cap on live workers for a freshly initialized queue.
pub const DEFAULT_MAX_WORKERS: u32 = 32;

/// Default per-worker idle timeout, in whole seconds, before a worker with
/// no work exits on its own.
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

/// Index of the pipe's read endpoint in `WorkQueue`'s pipe pair.
pub const READ_PIPE: usize = 0;

/// Index of the pipe's write endpoint in `WorkQueue`'s pipe pair.
pub const WRITE_PIPE: usize = 1;

/// POSIX guarantees `PIPE_BUF >= 512` on every conforming system. Used as a
/// compile-time upper bound for `WorkItem`'s size; the pipe transport still
/// queries the real, usually larger, `PIPE_BUF` at runtime for its own
/// bookkeeping.
pub const ATOMIC_WRITE_FLOOR: usize = 512;
