// SPDX-License-Identifier: GPL-2.0-only

//! The `"process"` backend: workers are forked child processes.
//!
//! The mutex and three condition variables guarding the shared counters
//! live in an anonymous `MAP_SHARED` mapping so they survive `fork()` and
//! stay visible to every child, initialized with `PTHREAD_PROCESS_SHARED`
//! attributes. This is the Rust/POSIX substitute for the original's System
//! V `shmget`/`shmat` segment — same idea (a kernel-backed region mapped
//! into every process that touches the queue), different syscall family.

use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use nix::unistd::{fork, ForkResult};

use workqueue_common::{Error, Result, Stat};

use crate::backend::Backend;
use crate::controller::WorkerLoop;
use crate::pipe::PipeTransport;
use crate::time::Timestamp;

#[repr(C)]
struct SharedState {
    mutex: libc::pthread_mutex_t,
    mutexattr: libc::pthread_mutexattr_t,
    work_cond: libc::pthread_cond_t,
    completion_cond: libc::pthread_cond_t,
    shutdown_cond: libc::pthread_cond_t,
    condattr: libc::pthread_condattr_t,
    available: u32,
    current: u32,
    shutdown: bool,
}

/// Process-backed worker pool.
pub struct ProcessBackend {
    shared: *mut SharedState,
    destroyed: AtomicBool,
}

// SAFETY: all access to `*shared` is bracketed by the process-shared
// pthread mutex, the same contract the thread backend upholds for its
// process-private one. The pointer itself is never reassigned after
// `new()`.
unsafe impl Send for ProcessBackend {}
unsafe impl Sync for ProcessBackend {}

static SIGCHLD_REAPER_INSTALLED: Once = Once::new();

extern "C" fn reap_children(_sig: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    loop {
        // SAFETY: async-signal-safe; no allocation, no locking.
        let pid = unsafe { libc::waitpid(-1, ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
    }
}

fn install_sigchld_reaper() {
    SIGCHLD_REAPER_INSTALLED.call_once(|| {
        // SAFETY: sa is fully initialized below before being passed to
        // sigaction; checking the existing handler first mirrors the
        // original's "only install if nothing is already hooked" rule.
        unsafe {
            let mut existing: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGCHLD, ptr::null(), &mut existing);
            let already_installed =
                existing.sa_sigaction != libc::SIG_DFL && existing.sa_sigaction != libc::SIG_IGN;
            if already_installed {
                return;
            }

            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = reap_children as *const () as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_NOCLDSTOP;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(libc::SIGCHLD, &sa, ptr::null_mut());
        }
    });
}

impl ProcessBackend {
    pub fn new() -> Self {
        install_sigchld_reaper();

        let len = std::mem::size_of::<SharedState>();
        // SAFETY: mmap with MAP_ANONYMOUS ignores fd/offset; the mapping
        // is MAP_SHARED so it is visible to children created by fork()
        // after this call.
        let region = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(
            region,
            libc::MAP_FAILED,
            "mmap of process-backend shared state failed"
        );

        let shared = region as *mut SharedState;
        // SAFETY: region is `len` bytes of fresh, zeroed, writable memory
        // (MAP_ANONYMOUS guarantees zero-fill) correctly aligned for
        // SharedState's C layout.
        unsafe {
            ptr::addr_of_mut!((*shared).available).write(0);
            ptr::addr_of_mut!((*shared).current).write(0);
            ptr::addr_of_mut!((*shared).shutdown).write(false);

            libc::pthread_mutexattr_init(ptr::addr_of_mut!((*shared).mutexattr));
            libc::pthread_mutexattr_setpshared(
                ptr::addr_of_mut!((*shared).mutexattr),
                libc::PTHREAD_PROCESS_SHARED,
            );
            libc::pthread_mutex_init(
                ptr::addr_of_mut!((*shared).mutex),
                ptr::addr_of!((*shared).mutexattr),
            );

            libc::pthread_condattr_init(ptr::addr_of_mut!((*shared).condattr));
            libc::pthread_condattr_setpshared(
                ptr::addr_of_mut!((*shared).condattr),
                libc::PTHREAD_PROCESS_SHARED,
            );
            libc::pthread_cond_init(
                ptr::addr_of_mut!((*shared).work_cond),
                ptr::addr_of!((*shared).condattr),
            );
            libc::pthread_cond_init(
                ptr::addr_of_mut!((*shared).completion_cond),
                ptr::addr_of!((*shared).condattr),
            );
            libc::pthread_cond_init(
                ptr::addr_of_mut!((*shared).shutdown_cond),
                ptr::addr_of!((*shared).condattr),
            );
        }

        Self {
            shared,
            destroyed: AtomicBool::new(false),
        }
    }

    fn cond_wait(&self, cond: *mut libc::pthread_cond_t, timeout_secs: u32) -> Result<()> {
        let mutex = unsafe { ptr::addr_of_mut!((*self.shared).mutex) };
        if timeout_secs == 0 {
            // SAFETY: mutex is held by the caller; cond belongs to this
            // mapping and stays valid for the backend's lifetime.
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

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn lock(&self) {
        // SAFETY: shared mutex stays valid and mapped for this backend's
        // whole lifetime, in every process that forked from the creator.
        unsafe {
            libc::pthread_mutex_lock(ptr::addr_of_mut!((*self.shared).mutex));
        }
    }

    fn unlock(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            libc::pthread_mutex_unlock(ptr::addr_of_mut!((*self.shared).mutex));
        }
    }

    fn locked(&self) -> bool {
        // SAFETY: trylock/unlock pair only probes lock state.
        unsafe {
            let mutex = ptr::addr_of_mut!((*self.shared).mutex);
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
        let shared = unsafe { &*self.shared };
        Stat {
            available: shared.available,
            current: shared.current,
            shutdown: shared.shutdown,
        }
    }

    fn submit(&self) {
        // SAFETY: work_cond stays valid and mapped for the backend's
        // lifetime.
        unsafe {
            libc::pthread_cond_signal(ptr::addr_of_mut!((*self.shared).work_cond));
        }
    }

    fn wait(&self, timeout_secs: u32) -> Result<()> {
        self.cond_wait(
            unsafe { ptr::addr_of_mut!((*self.shared).completion_cond) },
            timeout_secs,
        )
    }

    fn worker_create(&self, worker_loop: WorkerLoop) -> Result<()> {
        // SAFETY: caller holds the lock. Block every signal across the
        // fork so SIGCHLD (or anything else) can't run a handler in the
        // child before it has finished setting itself up, mirroring the
        // original's sigfillset + SIG_BLOCK around fork().
        let mut full_set: libc::sigset_t = unsafe { std::mem::zeroed() };
        let mut old_set: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigfillset(&mut full_set);
            libc::pthread_sigmask(libc::SIG_BLOCK, &full_set, &mut old_set);
        }

        // SAFETY: fork() duplicates the address space; worker_loop only
        // captures an Arc, which is valid in both the parent's and the
        // child's copy of memory.
        let outcome = unsafe { fork() };

        match outcome {
            Ok(ForkResult::Child) => {
                unsafe {
                    libc::pthread_sigmask(libc::SIG_SETMASK, &old_set, ptr::null_mut());
                }
                worker_loop();
                std::process::exit(0);
            }
            Ok(ForkResult::Parent { .. }) => {
                unsafe {
                    libc::pthread_sigmask(libc::SIG_SETMASK, &old_set, ptr::null_mut());
                    (*self.shared).current += 1;
                }
                Ok(())
            }
            Err(errno) => {
                unsafe {
                    libc::pthread_sigmask(libc::SIG_SETMASK, &old_set, ptr::null_mut());
                }
                Err(Error::SystemError(format!("fork failed: {errno}")))
            }
        }
    }

    fn self_id(&self) -> i64 {
        std::process::id() as i64
    }

    fn worker_start(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.shared).available += 1;
        }
    }

    fn worker_wait(&self, timeout_secs: u32) -> Result<()> {
        self.cond_wait(
            unsafe { ptr::addr_of_mut!((*self.shared).work_cond) },
            timeout_secs,
        )
    }

    fn worker_busy(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.shared).available -= 1;
        }
    }

    fn worker_idle(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.shared).available += 1;
        }
    }

    fn worker_complete(&self) {
        // SAFETY: completion_cond stays valid and mapped for the
        // backend's lifetime.
        unsafe {
            libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.shared).completion_cond));
        }
    }

    fn worker_finish(&self) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.shared).available -= 1;
            (*self.shared).current -= 1;
            libc::pthread_cond_signal(ptr::addr_of_mut!((*self.shared).shutdown_cond));
        }
    }

    fn shutdown(&self, pipe: &PipeTransport) {
        // SAFETY: caller holds the lock.
        unsafe {
            (*self.shared).shutdown = true;
            libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.shared).work_cond));
            pipe.close_read();
            while (*self.shared).current > 0 {
                let rc = libc::pthread_cond_wait(
                    ptr::addr_of_mut!((*self.shared).shutdown_cond),
                    ptr::addr_of_mut!((*self.shared).mutex),
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
        // SAFETY: shutdown already waited for every child to exit, so no
        // other process can be touching this mapping.
        unsafe {
            libc::pthread_mutexattr_destroy(ptr::addr_of_mut!((*self.shared).mutexattr));
            libc::pthread_condattr_destroy(ptr::addr_of_mut!((*self.shared).condattr));
            libc::munmap(
                self.shared as *mut libc::c_void,
                std::mem::size_of::<SharedState>(),
            );
        }
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_backend_is_idle_and_unlocked() {
        let backend = ProcessBackend::new();
        backend.lock();
        let st = backend.stat();
        backend.unlock();
        assert_eq!(st.available, 0);
        assert_eq!(st.current, 0);
        assert!(!st.shutdown);
        assert!(!backend.locked());
    }

    #[test]
    fn self_id_is_current_pid() {
        let backend = ProcessBackend::new();
        assert_eq!(backend.self_id(), std::process::id() as i64);
    }
}
