// SPDX-License-Identifier: GPL-2.0-only

//! Pipe-backed item transport.
//!
//! A single `pipe(2)` pair carries [`WorkItem`]s from submitters to workers.
//! The read end is non-blocking: workers poll it under their backend's
//! condition variable rather than parking in a blocking `read`. As long as
//! `size_of::<WorkItem>() <= PIPE_BUF`, POSIX guarantees each write lands in
//! the pipe atomically and whole, so no two readers can ever observe a torn
//! item — this is the only synchronization the transport itself needs.

use std::io;
use std::mem::size_of;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use workqueue_common::{Error, Result, WorkItem};

/// One end of the queue's pipe.
///
/// Both file descriptors live behind `AtomicI32` rather than plain `RawFd`
/// fields so that `close_write`/`close_read` can run through a shared `&self`
/// — the controller hands every worker an `Arc<PipeTransport>`, the backend's
/// `shutdown` closes the read end while a concurrent `submit` may still be
/// writing, and `destroy` closes the write end from whichever thread called
/// it while workers are concurrently reading.
pub struct PipeTransport {
    read_fd: AtomicI32,
    write_fd: AtomicI32,
}

impl PipeTransport {
    /// Opens a fresh pipe and arms the read end for non-blocking reads.
    pub fn open() -> Result<Self> {
        let mut fds: [RawFd; 2] = [-1, -1];
        // SAFETY: fds is a valid 2-element buffer for pipe(2) to fill.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(Error::IoError(io::Error::last_os_error()));
        }

        let transport = Self {
            read_fd: AtomicI32::new(fds[workqueue_common::config::READ_PIPE]),
            write_fd: AtomicI32::new(fds[workqueue_common::config::WRITE_PIPE]),
        };
        transport.set_read_nonblocking()?;
        Ok(transport)
    }

    fn set_read_nonblocking(&self) -> Result<()> {
        let read_fd = self.read_fd.load(Ordering::Acquire);
        // SAFETY: read_fd is open and owned by this transport.
        let flags = unsafe { libc::fcntl(read_fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(Error::IoError(io::Error::last_os_error()));
        }
        // SAFETY: same as above; flags is the value just read back.
        let rc = unsafe { libc::fcntl(read_fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(Error::IoError(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Writes one item. POSIX guarantees this is atomic with respect to
    /// other writers as long as the item fits within `PIPE_BUF`, which the
    /// compile-time assertion on `WorkItem` enforces.
    pub fn send(&self, item: &WorkItem) -> Result<()> {
        let buf = item as *const WorkItem as *const u8;
        let len = size_of::<WorkItem>();
        let write_fd = self.write_fd.load(Ordering::Acquire);
        loop {
            // SAFETY: buf points to a valid, initialized WorkItem of
            // exactly `len` bytes; write_fd is open for writing.
            let rc = unsafe { libc::write(write_fd, buf as *const libc::c_void, len) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::IoError(err));
            }
            if rc as usize != len {
                return Err(Error::SystemError(format!(
                    "short pipe write: wrote {rc} of {len} bytes"
                )));
            }
            return Ok(());
        }
    }

    /// Non-blocking read of one item.
    ///
    /// Returns `Ok(Some(item))` on a full read, `Ok(None)` when the pipe has
    /// no data right now (`EAGAIN`/`EWOULDBLOCK`) or has been closed by the
    /// write side (EOF, read returns 0), distinguished via
    /// [`RecvOutcome`].
    pub fn try_recv(&self) -> Result<RecvOutcome> {
        let mut item = WorkItem {
            func: noop_work_fn,
            arg: 0,
        };
        let buf = &mut item as *mut WorkItem as *mut u8;
        let len = size_of::<WorkItem>();
        let read_fd = self.read_fd.load(Ordering::Acquire);

        // SAFETY: buf points to a valid, writable WorkItem-sized buffer;
        // read_fd is open for reading and non-blocking.
        let rc = unsafe { libc::read(read_fd, buf as *mut libc::c_void, len) };
        if rc == 0 {
            return Ok(RecvOutcome::Closed);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
                io::ErrorKind::Interrupted => Ok(RecvOutcome::WouldBlock),
                _ => Err(Error::IoError(err)),
            };
        }
        if rc as usize != len {
            return Err(Error::SystemError(format!(
                "short pipe read: read {rc} of {len} bytes"
            )));
        }
        Ok(RecvOutcome::Item(item))
    }

    /// Closes the write end. Workers blocked on a non-blocking read then
    /// observe EOF (`read` returning 0) once the pipe drains, which is how
    /// shutdown unwedges any worker that isn't also waiting on the backend's
    /// condition variable.
    pub fn close_write(&self) {
        let fd = self.write_fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            // SAFETY: fd was the write end owned by this transport, and the
            // swap ensures only one caller ever observes and closes it.
            unsafe {
                libc::close(fd);
            }
        }
    }

    /// Closes the read end.
    pub fn close_read(&self) {
        let fd = self.read_fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            // SAFETY: fd was the read end owned by this transport, and the
            // swap ensures only one caller ever observes and closes it.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.close_write();
        self.close_read();
    }
}

/// The platform's actual atomic-write bound for this pipe, as opposed to
/// the portable `512`-byte floor [`workqueue_common::config::ATOMIC_WRITE_FLOOR`]
/// guarantees. Linux reports `4096`; the number is informational only —
/// nothing in this crate depends on it being larger than the floor.
pub fn atomic_write_bound() -> usize {
    libc::PIPE_BUF as usize
}

/// Outcome of a non-blocking read attempt.
pub enum RecvOutcome {
    Item(WorkItem),
    WouldBlock,
    Closed,
}

fn noop_work_fn(_worker: i64, _arg: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_item() {
        let transport = PipeTransport::open().expect("open pipe");
        let item = WorkItem {
            func: noop_work_fn,
            arg: 42,
        };
        transport.send(&item).expect("send");

        match transport.try_recv().expect("recv") {
            RecvOutcome::Item(got) => assert_eq!(got.arg, 42),
            _ => panic!("expected an item"),
        }
    }

    #[test]
    fn empty_pipe_would_block() {
        let transport = PipeTransport::open().expect("open pipe");
        match transport.try_recv().expect("recv") {
            RecvOutcome::WouldBlock => {}
            _ => panic!("expected would-block on an empty pipe"),
        }
    }

    #[test]
    fn closed_write_end_yields_eof() {
        let transport = PipeTransport::open().expect("open pipe");
        transport.close_write();
        match transport.try_recv().expect("recv") {
            RecvOutcome::Closed => {}
            _ => panic!("expected EOF once the write end is closed"),
        }
    }
}
