// SPDX-License-Identifier: GPL-2.0-only

//! # workqueue-core
//!
//! An elastic pool of thread or process workers pulling work items off a
//! pipe. One `pipe(2)` pair is the entire queue: submitters write a fixed
//! size `WorkItem` and workers read it back, relying on the kernel's
//! atomic-write guarantee (`PIPE_BUF`) instead of a second lock to keep
//! items from tearing across readers. Workers are created lazily, one at
//! a time, only when every existing worker is busy and the pool is under
//! its cap; there is no pre-warming and no explicit scale-down — an idle
//! worker exits on its own once `worker_wait` times out.
//!
//! Two backends ship with the crate:
//!
//! - `"thread"` — workers are threads in this process, synchronized with a
//!   process-private `pthread_mutex_t`/three `pthread_cond_t`s.
//! - `"process"` — workers are `fork()`ed children, synchronized through
//!   the same primitives placed in an anonymous, process-shared mapping
//!   (`unix` only).
//!
//! ```no_run
//! use workqueue_core::WorkQueue;
//!
//! fn handle(worker: i64, arg: usize) {
//!     println!("worker {worker} picked up {arg}");
//! }
//!
//! let wq = WorkQueue::init(None).expect("init");
//! wq.submit(handle, 42).expect("submit");
//! wq.destroy();
//! ```

mod backend;
mod controller;
mod pipe;
#[cfg(unix)]
mod process_backend;
mod thread_backend;
mod time;
pub mod trace;

pub use backend::Backend;
pub use controller::{Builder, WorkQueue, WorkerLoop};
pub use pipe::{atomic_write_bound, PipeTransport, RecvOutcome};
pub use time::Timestamp;

pub use workqueue_common::{config, Error, Result, Stat, WorkFn, WorkItem};
