// SPDX-License-Identifier: GPL-2.0-only

//! The public work-queue façade.
//!
//! `WorkQueue` owns the pipe transport and a chosen [`Backend`]; everything
//! it does is a thin, traced wrapper around calls into that backend, plus
//! the elastic worker-creation policy and the item-retrieval loop that the
//! original library's `workqueue_submit`/`workqueue_worker`/
//! `workqueue_getitem` implemented directly against a single backend
//! vtable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use workqueue_common::{config, Error, Result, Stat, WorkFn, WorkItem};

use crate::backend::{self, Backend};
use crate::pipe::{PipeTransport, RecvOutcome};
use crate::trace;

/// The closure a backend runs to execute one worker's lifetime: lock,
/// announce start, pull items until told to stop, announce finish.
/// Backends treat it as an opaque thunk — they only decide *how* to run
/// it (spawn a thread, fork a process), never *what* it does.
pub type WorkerLoop = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    pipe: PipeTransport,
    backend: Box<dyn Backend>,
    max_workers: u32,
    timeout_secs: u32,
}

/// An elastic pool of workers pulling [`WorkItem`]s off a shared pipe.
///
/// Cloning is not supported — a `WorkQueue` is a single logical queue with
/// a single backend and a single pipe; share it across threads with
/// `Arc<WorkQueue>` the way any other owned resource would be shared.
pub struct WorkQueue {
    inner: Arc<Inner>,
    destroyed: AtomicBool,
}

/// Ergonomic alternative to [`WorkQueue::init`] for callers who want to
/// override the worker cap or idle timeout at construction time, rather
/// than through a second call after `init`.
pub struct Builder {
    backend_name: Option<String>,
    max_workers: u32,
    timeout_secs: u32,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            backend_name: None,
            max_workers: config::DEFAULT_MAX_WORKERS,
            timeout_secs: config::DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Selects a backend by name. Unset selects the first registered
    /// backend (`"thread"`), matching [`WorkQueue::init`]'s `None` case.
    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend_name = Some(name.into());
        self
    }

    /// Caps the number of live workers. Workers are still created lazily;
    /// this only bounds how high `current` can climb.
    pub fn num_workers(mut self, max_workers: u32) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Seconds an idle worker waits for new work before exiting on its
    /// own. `0` means wait indefinitely.
    pub fn timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn build(self) -> Result<WorkQueue> {
        let backend = backend::resolve(self.backend_name.as_deref())?;
        let pipe = PipeTransport::open()?;
        tracing::debug!(
            backend = backend.name(),
            max_workers = self.max_workers,
            timeout_secs = self.timeout_secs,
            "workqueue initialized"
        );
        Ok(WorkQueue {
            inner: Arc::new(Inner {
                pipe,
                backend,
                max_workers: self.max_workers,
                timeout_secs: self.timeout_secs,
            }),
            destroyed: AtomicBool::new(false),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    /// Initializes a queue against the named backend, or the default
    /// (first-registered, `"thread"`) backend when `name` is `None`.
    pub fn init(backend_name: Option<&str>) -> Result<Self> {
        let mut builder = Builder::new();
        if let Some(name) = backend_name {
            builder = builder.backend(name);
        }
        builder.build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Submits one item of work. Creates a new worker first if every
    /// existing worker is busy and the pool is under its cap — lazily,
    /// never eagerly, and with no corresponding scale-down signal: idle
    /// workers exit on their own `worker_wait` timeout.
    pub fn submit(&self, func: WorkFn, arg: usize) -> Result<()> {
        let item = WorkItem { func, arg };
        tracing::trace!(arg, "submit");

        self.inner.backend.lock();
        let st = self.inner.backend.stat();
        if st.available == 0 && st.current < self.inner.max_workers {
            let inner = Arc::clone(&self.inner);
            let worker_loop: WorkerLoop = Arc::new(move || Self::worker_main(&inner));
            match self.inner.backend.worker_create(worker_loop) {
                Ok(()) => {
                    tracing::debug!(current = st.current + 1, "worker created");
                    trace::emit(&format!("worker created: current={}", st.current + 1));
                }
                Err(err) => {
                    tracing::warn!(?err, "worker creation failed");
                    trace::emit(&format!("*** ERROR *** worker creation failed: {err}"));
                }
            }
        }
        self.inner.backend.unlock();

        self.inner.pipe.send(&item)?;
        self.inner.backend.submit();
        Ok(())
    }

    /// Whether every live worker is idle. Meaningful without holding the
    /// lock only as an instantaneous snapshot — callers that need a
    /// stable answer should `lock()` first.
    pub fn idle(&self) -> bool {
        self.inner.backend.lock();
        let st = self.inner.backend.stat();
        self.inner.backend.unlock();
        st.is_idle()
    }

    /// Blocks until the backend signals a completed item, or `timeout_secs`
    /// elapses (`0` waits indefinitely). Requires the caller to already
    /// hold the lock; returns [`Error::NotLocked`] otherwise.
    pub fn wait(&self, timeout_secs: u32) -> Result<()> {
        if !self.inner.backend.locked() {
            tracing::warn!("wait called without holding the lock");
            return Err(Error::NotLocked);
        }
        let rc = self.inner.backend.wait(timeout_secs);
        match &rc {
            Ok(()) => tracing::trace!("wait: signalled"),
            Err(Error::Timeout) => tracing::trace!("wait: timed out"),
            Err(err) => tracing::warn!(?err, "wait failed"),
        }
        rc
    }

    pub fn lock(&self) {
        self.inner.backend.lock();
        tracing::trace!("locked");
    }

    pub fn unlock(&self) {
        tracing::trace!("unlocked");
        self.inner.backend.unlock();
    }

    pub fn locked(&self) -> bool {
        self.inner.backend.locked()
    }

    /// This worker's identity (thread sequence number, or OS pid for the
    /// process backend). Meaningful only when called from inside a worker
    /// that has already run past `worker_start`.
    pub fn self_id(&self) -> i64 {
        self.inner.backend.self_id()
    }

    pub fn stat(&self) -> Stat {
        self.inner.backend.stat()
    }

    /// Signals every worker to stop, waits for them to drain, then
    /// releases backend resources. Idempotent: a second call is a no-op.
    /// Called automatically by `Drop` if the caller never calls it
    /// explicitly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("destroying workqueue");
        self.inner.backend.lock();
        self.inner.backend.shutdown(&self.inner.pipe);
        self.inner.pipe.close_write();
        self.inner.backend.destroy();
        self.inner.backend.unlock();
        tracing::debug!("workqueue destroyed");
    }

    fn worker_main(inner: &Arc<Inner>) {
        inner.backend.lock();
        inner.backend.worker_start();
        inner.backend.unlock();

        let id = inner.backend.self_id();
        tracing::debug!(worker = id, "worker start");

        loop {
            inner.backend.lock();
            let item = match Self::get_item(inner) {
                Some(item) => item,
                None => break,
            };
            inner.backend.worker_busy();
            inner.backend.unlock();

            tracing::trace!(worker = id, "executing item");
            (item.func)(id, item.arg);

            inner.backend.lock();
            inner.backend.worker_complete();
            inner.backend.worker_idle();
            inner.backend.unlock();
        }

        // Still locked from the final loop iteration, matching the
        // original worker's "finish while locked, then unlock" sequence.
        inner.backend.worker_finish();
        let st = inner.backend.stat();
        tracing::debug!(worker = id, current = st.current, "worker exiting");
        inner.backend.unlock();
    }

    /// Pulls the next item off the pipe, blocking (via the backend's
    /// condition variable) when none is ready. Called with the lock held.
    /// Returns `None` on shutdown, pipe closure, a wait timeout, or any
    /// I/O error — in every case the worker simply exits, as the original
    /// library's `workqueue_getitem` does for any non-zero return.
    fn get_item(inner: &Inner) -> Option<WorkItem> {
        loop {
            let st = inner.backend.stat();
            if st.shutdown {
                return None;
            }

            match inner.pipe.try_recv() {
                Ok(RecvOutcome::Item(item)) => return Some(item),
                Ok(RecvOutcome::Closed) => return None,
                Ok(RecvOutcome::WouldBlock) => {
                    match inner.backend.worker_wait(inner.timeout_secs) {
                        Ok(()) => continue,
                        Err(Error::Timeout) => return None,
                        Err(err) => {
                            tracing::warn!(?err, "worker_wait failed");
                            return None;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, "pipe read failed");
                    return None;
                }
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn increment(_worker: i64, _arg: usize) {
        COUNTER.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn submit_one_item_runs_on_thread_backend() {
        COUNTER.store(0, Ordering::SeqCst);
        let wq = WorkQueue::init(Some("thread")).expect("init");
        wq.submit(increment, 0).expect("submit");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while COUNTER.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_without_lock_is_rejected() {
        let wq = WorkQueue::init(Some("thread")).expect("init");
        let err = wq.wait(1).unwrap_err();
        assert!(matches!(err, Error::NotLocked));
    }

    #[test]
    fn unknown_backend_name_is_rejected() {
        let err = WorkQueue::init(Some("quantum")).unwrap_err();
        assert!(matches!(err, Error::InvalidBackend(_)));
    }

    #[test]
    fn fresh_queue_is_idle() {
        let wq = WorkQueue::init(Some("thread")).expect("init");
        assert!(wq.idle());
    }

    #[test]
    fn builder_overrides_defaults() {
        let wq = WorkQueue::builder()
            .backend("thread")
            .num_workers(4)
            .timeout_secs(1)
            .build()
            .expect("build");
        assert!(wq.idle());
    }
}
