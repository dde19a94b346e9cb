// SPDX-License-Identifier: GPL-2.0-only

//! The `"thread"` backend: workers are threads within this process.
//!
//! Mirrors `process_backend`'s pthread plumbing almost exactly, minus the
//! shared-memory mapping and the `PTHREAD_PROCESS_SHARED` attributes —
//! everything here is process-private. The two backends are kept visibly
//! parallel on purpose: `workqueue_lock`/`unlock`/`locked` are free
//! functions in the original library, not a borrowed guard, so this crate's
//! `Backend::lock`/`unlock` need a mutex that can be locked in one call and
//! unlocked in a later, unrelated one — something a safe Rust `Mutex`
//! guard cannot express, but a raw `pthread_mutex_t` does by nature.

use std::cell::Cell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use workqueue_common::{Error, Result, Stat};

use crate::backend::Backend;
use crate::controller::WorkerLoop;
use crate::pipe::PipeTransport;
use crate::time::Timestamp;

thread_local! {
    static WORKER_ID: Cell<u32> = const { Cell::new(0) };
}

struct State {
    mutex: libc::pthread_mutex_t,
    work_cond: libc::pthread_cond_t,
    completion_cond: libc::pthread_cond_t,
    shutdown_cond: libc::pthread_cond_t,
    available: u32,
    current: u32,
    shutdown: bool,
    next_worker_id: u32,
}

/// Thread-backed worker pool.
pub struct ThreadBackend {
    state: Box<std::cell::UnsafeCell<State>>,
    destroyed: AtomicBool,
}

// SAFETY: every field access to `state` happens either behind the raw
// pthread mutex (`lock`/`unlock` bracket all reads and writes performed by
// `Backend` methods) or is itself a pthread primitive designed for
// concurrent access (the mutex and condvars). `destroy` is the sole
// exception and is only ever called once, after `shutdown` has already
// waited out every worker.
unsafe impl Send for ThreadBackend {}
unsafe impl Sync for ThreadBackend {}

impl ThreadBackend {
    pub fn new() -> Self {
        let mut state = MaybeUninit::<State>::uninit();
        // SAFETY: state is large enough and alignment-correct for State;
        // we immediately overwrite every field with a valid initializer
        // before any other code can observe it.
        unsafe {
            let ptr = state.as_mut_ptr();
            libc::pthread_mutex_init(ptr::addr_of_mut!((*ptr).mutex), ptr::null());
            libc::pthread_cond_init(ptr::addr_of_mut!((*ptr).work_cond), ptr::null());
            libc::pthread_cond_init(ptr::addr_of_mut!((*ptr).completion_cond), ptr::null());
            libc::pthread_cond_init(ptr::addr_of_mut!((*ptr).shutdown_cond), ptr::null());
            (*ptr).available = 0;
            (*ptr).current = 0;
            (*ptr).shutdown = false;
            (*ptr).next_worker_id = 0;
        }
        // SAFETY: every field was just initialized above.
        let state = unsafe { state.assume_init() };
        Self {
            state: Box::new(std::cell::UnsafeCell::new(state)),
            destroyed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> *mut State {
        self.state.get()
    }

    fn cond_wait(&self, cond: *mut libc::pthread_cond_t, timeout_secs: u32) -> Result<()> {
        let mutex = unsafe { ptr::addr_of_mut!((*self.state()).mutex) };
        if timeout_secs == 0 {
            // SAFETY: mutex is held by the calling thread (required by the
            // trait's contract), cond belongs to this backend's state.
            let rc = unsafe { libc::pthread_cond_wait(cond, mutex) };
            return if rc == 0 {
                Ok(())
            } else {
                Err(Error::SystemError(format!("pthread_cond_wait: {rc}")))
            };
        }

        let deadline = Timestamp::now().plus_secs(timeout_secs);
        // SAFETY: same as above; deadline is a valid absolute timespec.
        let rc = unsafe { libc::pthread_cond_timedwait(cond, mutex, &deadline) };
        match rc {
            0 => Ok(()),
            libc::ETIMEDOUT => Err(Error::Timeout),
            rc => Err(Error::SystemError(format!("pthread_cond_timedwait: {rc}"))),
        }
    }
}

impl Default for ThreadBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ThreadBackend {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn lock(&self) {
        // SAFETY: mutex is a valid, initialized pthread_mutex_t owned by
        // this backend for its entire lifetime.
        unsafe {
            libc::pthread_mutex_lock(ptr::addr_of_mut!((*self.state()).mutex));
        }
    }

    fn unlock(&self) {
        // SAFETY: caller holds the lock per the trait's contract.
        unsafe {
            libc::pthread_mutex_unlock(ptr::addr_of_mut!((*self.state()).mutex));
        }
    }

    fn locked(&self) -> bool {
        // SAFETY: trylock/unlock pair only probes lock state, mirroring
        // the original's "trylock then immediately unlock" idiom.
        unsafe {
            let mutex = ptr::addr_of_mut!((*self.state()).mutex);
            let rc = libc::pthread_mutex_trylock(mutex);
            if rc == 0 {
                libc::pthread_mutex_unlock(mutex);
                false
            } else {
                rc == libc::EBUSY
            }
        }
    }

    fn stat(&self) -> Stat {
        // SAFETY: caller holds the lock.
        let state = unsafe { &*self.state() };
        Stat {
            available: state.available,
            current: state.current,
            shutdown: state.shutdown,
        }
    }

    fn submit(&self) {
        // SAFETY: work_cond is valid for this backend's lifetime.
        unsafe {
            libc::pthread_cond_signal(ptr::addr_of_mut!((*self.state()).work_cond));
        }
    }

    fn wait(&self, timeout_secs: u32) -> Result<()> {
        self.cond_wait(
            unsafe { ptr::addr_of_mut!((*self.state()).completion_cond) },
            timeout_secs,
        )
    }

    fn worker_create(&self, worker_loop: WorkerLoop) -> Result<()> {
        // SAFETY: caller holds the lock (contract of worker_create).
        // Block every signal for the duration of thread creation so a
        // handler never runs on a half-initialized worker stack, mirroring
        // the original's sigfillset + SIG_BLOCK around pthread_create.
        let mut full_set: libc::sigset_t = unsafe { std::mem::zeroed() };
        let mut old_set: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigfillset(&mut full_set);
            libc::pthread_sigmask(libc::SIG_BLOCK, &full_set, &mut old_set);
        }

        let spawned = std::thread::Builder::new()
            .name("workqueue-worker".to_string())
            .spawn(move || worker_loop());

        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &old_set, ptr::null_mut());
        }

        match spawned {
            Ok(handle) => {
                // Detach: the worker lives until it self-terminates; no
                // caller ever joins it.
                drop(handle);
                // SAFETY: caller holds the lock.
                unsafe {
                    (*self.state()).current += 1;
                }
                Ok(())
            }
            Err(err) => Err(Error::SystemError(format!("thread spawn failed: {err}"))),
        }
    }

    fn self_id(&self) -> i64 {
        WORKER_ID.with(|id| id.get() as i64)
    }

    fn worker_start(&self) {
        // SAFETY: caller holds the lock.
        let state = unsafe { &mut *self.state() };
        state.available += 1;
        state.next_worker_id += 1;
        let id = state.next_worker_id;
        WORKER_ID.with(|slot| slot.set(id));
    }

    fn worker_wait(&self, timeout_secs: u32) -> Result<()> {
        self.cond_wait(
            unsafe { ptr::addr_of_mut!((*self.state()).work_cond) },
            timeout_secs,
        )
    }

    fn worker_busy(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.state()).available -= 1;
        }
    }

    fn worker_idle(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.state()).available += 1;
        }
    }

    fn worker_complete(&self) {
        // SAFETY: completion_cond is valid for this backend's lifetime.
        unsafe {
            libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.state()).completion_cond));
        }
    }

    fn worker_finish(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            let state = &mut *self.state();
            state.available -= 1;
            state.current -= 1;
            libc::pthread_cond_signal(ptr::addr_of_mut!(state.shutdown_cond));
        }
    }

    fn shutdown(&self, pipe: &PipeTransport) {
        // SAFETY: caller holds the lock.
        unsafe {
            let state = &mut *self.state();
            state.shutdown = true;
            libc::pthread_cond_broadcast(ptr::addr_of_mut!(state.work_cond));
            pipe.close_read();
            while state.current > 0 {
                let rc = libc::pthread_cond_wait(
                    ptr::addr_of_mut!(state.shutdown_cond),
                    ptr::addr_of_mut!(state.mutex),
                );
                if rc != 0 {
                    break;
                }
            }
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: every worker has exited (shutdown waited for
        // current == 0) so no thread can be touching these primitives.
        unsafe {
            let state = &mut *self.state();
            libc::pthread_mutex_destroy(&mut state.mutex);
            libc::pthread_cond_destroy(&mut state.work_cond);
            libc::pthread_cond_destroy(&mut state.completion_cond);
            libc::pthread_cond_destroy(&mut state.shutdown_cond);
        }
    }
}

impl Drop for ThreadBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_backend_is_idle_and_unlocked() {
        let backend = ThreadBackend::new();
        backend.lock();
        let st = backend.stat();
        backend.unlock();
        assert_eq!(st.available, 0);
        assert_eq!(st.current, 0);
        assert!(!st.shutdown);
        assert!(!backend.locked());
    }

    #[test]
    fn locked_reports_true_while_held() {
        let backend = ThreadBackend::new();
        backend.lock();
        assert!(backend.locked());
        backend.unlock();
        assert!(!backend.locked());
    }

    #[test]
    fn worker_start_assigns_increasing_ids() {
        let backend = ThreadBackend::new();
        backend.lock();
        backend.worker_start();
        let first = backend.self_id();
        backend.worker_start();
        let second = backend.self_id();
        backend.unlock();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
