// SPDX-License-Identifier: GPL-2.0-only

//! The backend interface and its registry.
//!
//! A backend owns the synchronization primitives behind `lock`/`unlock`,
//! the worker-count bookkeeping behind `stat`, and the mechanism for
//! spawning a worker. Everything else is an optional hook with a no-op
//! default, mirroring the original C vtable's habit of checking a function
//! pointer for `NULL` before calling through it.

use workqueue_common::{Result, Stat};

use crate::controller::WorkerLoop;
use crate::pipe::PipeTransport;

/// Execution strategy for a work queue: how workers are created and how the
/// queue's lock, condition variables, and counters are implemented.
///
/// `lock`/`unlock`/`locked`/`stat`/`submit`/`wait` are the required surface;
/// every `worker_*` hook and `shutdown`/`destroy` default to doing nothing,
/// since not every backend needs, say, a distinct busy/idle transition.
pub trait Backend: Send + Sync {
    /// Name used to select this backend from [`crate::controller::WorkQueue::init`].
    fn name(&self) -> &'static str;

    fn lock(&self);
    fn unlock(&self);
    fn locked(&self) -> bool;
    fn stat(&self) -> Stat;

    /// Wakes one worker blocked in `worker_wait` to notice a new item.
    fn submit(&self);

    /// Blocks the calling thread until `worker_complete` fires or `timeout`
    /// (whole seconds; 0 means wait indefinitely) elapses.
    fn wait(&self, timeout_secs: u32) -> Result<()>;

    /// Spawns a new worker that will run `worker_loop`. Called with the
    /// backend's lock held. Only invoked when `stat().available == 0` and
    /// the queue is under its worker cap.
    fn worker_create(&self, worker_loop: WorkerLoop) -> Result<()>;

    /// This worker's stable identity (thread id within a process, or pid
    /// for a process-backed worker). Only meaningful after `worker_start`.
    fn self_id(&self) -> i64;

    /// Called by a brand new worker, under lock, before it looks for work.
    fn worker_start(&self) {}

    /// Blocks a worker with no item waiting, under the lock, until new work
    /// is submitted or `timeout` seconds elapse. Returns `Err(Error::Timeout)`
    /// on expiry.
    fn worker_wait(&self, _timeout_secs: u32) -> Result<()> {
        Ok(())
    }

    fn worker_busy(&self) {}
    fn worker_idle(&self) {}
    fn worker_complete(&self) {}
    fn worker_finish(&self) {}

    /// Signals every worker to exit and blocks until the last one has, under
    /// the lock, called from [`crate::controller::WorkQueue::destroy`].
    /// Must close `pipe`'s read end after broadcasting the work cond and
    /// before waiting on the shutdown cond, so a `submit` racing the
    /// shutdown fails its pipe write instead of silently losing the item.
    fn shutdown(&self, _pipe: &PipeTransport) {}

    /// Releases whatever resources `worker_create`/backend `init` acquired.
    fn destroy(&self) {}
}

/// Selects a backend implementation by name, or the first-registered
/// default when `name` is `None` — matching the original library's
/// "first entry in the static backend table wins" convention.
pub fn resolve(name: Option<&str>) -> workqueue_common::Result<Box<dyn Backend>> {
    let registry = registry();
    match name {
        Some(name) => registry
            .into_iter()
            .find(|ctor| ctor.0 == name)
            .map(|ctor| (ctor.1)())
            .ok_or_else(|| workqueue_common::Error::InvalidBackend(name.to_string())),
        None => Ok((registry[0].1)()),
    }
}

type BackendCtor = (&'static str, fn() -> Box<dyn Backend>);

fn registry() -> Vec<BackendCtor> {
    let mut backends: Vec<BackendCtor> = vec![("thread", || {
        Box::new(crate::thread_backend::ThreadBackend::new())
    })];

    #[cfg(unix)]
    backends.push(("process", || {
        Box::new(crate::process_backend::ProcessBackend::new())
    }));

    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_is_thread() {
        let backend = resolve(None).expect("default backend resolves");
        assert_eq!(backend.name(), "thread");
    }

    #[test]
    fn unknown_backend_name_is_rejected() {
        let err = resolve(Some("quantum")).unwrap_err();
        assert!(matches!(err, workqueue_common::Error::InvalidBackend(_)));
    }
}
