// SPDX-License-Identifier: GPL-2.0-only

//! Multi-backend drain scenarios: submit a batch of items, wait for the
//! pool to go idle, and check every item actually ran.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use workqueue_core::WorkQueue;

fn drain(wq: &WorkQueue, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    wq.lock();
    while !wq.idle() {
        if Instant::now() >= deadline {
            wq.unlock();
            panic!("workqueue did not drain within {timeout:?}");
        }
        let _ = wq.wait(1);
    }
    wq.unlock();
}

#[test]
fn single_item_completes_on_thread_backend() {
    static DONE: AtomicUsize = AtomicUsize::new(0);
    fn work(_id: i64, _arg: usize) {
        DONE.fetch_add(1, Ordering::SeqCst);
    }

    let wq = WorkQueue::init(Some("thread")).expect("init");
    wq.submit(work, 0).expect("submit");
    drain(&wq, Duration::from_secs(2));

    assert_eq!(DONE.load(Ordering::SeqCst), 1);
}

#[test]
fn ten_items_all_complete_on_thread_backend() {
    static COMPLETED: AtomicUsize = AtomicUsize::new(0);
    fn work(_id: i64, _arg: usize) {
        COMPLETED.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
    }

    let wq = WorkQueue::init(Some("thread")).expect("init");
    for i in 0..10 {
        wq.submit(work, i).expect("submit");
    }
    drain(&wq, Duration::from_secs(5));

    assert_eq!(COMPLETED.load(Ordering::SeqCst), 10);
}

// Child-local atomics never make it back to the parent across fork(), so
// the process-backend equivalent of the above has each child report its
// pid over a socketpair instead, giving the parent a way to observe that
// ten distinct OS processes actually ran the item.
#[cfg(unix)]
#[test]
fn ten_items_on_process_backend_run_in_distinct_pids() {
    use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
    use std::os::unix::net::UnixDatagram;
    use std::sync::OnceLock;

    static REPORTER_FD: OnceLock<RawFd> = OnceLock::new();

    fn report_pid(_id: i64, _arg: usize) {
        let fd = *REPORTER_FD.get().expect("reporter fd installed before submit");
        // SAFETY: fd names the reporter half of a socketpair that outlives
        // every worker this test forks; wrapping it borrows the fd for one
        // send, and `forget` below leaves the real owner's close() to the
        // parent's `UnixDatagram` drop instead of double-closing it here.
        let borrowed = unsafe { UnixDatagram::from_raw_fd(fd) };
        let _ = borrowed.send(&std::process::id().to_le_bytes());
        std::mem::forget(borrowed);
    }

    let (reporter, collector) = UnixDatagram::pair().expect("socketpair");
    REPORTER_FD.set(reporter.as_raw_fd()).ok();

    let wq = WorkQueue::init(Some("process")).expect("init");
    for i in 0..10 {
        wq.submit(report_pid, i).expect("submit");
    }
    drain(&wq, Duration::from_secs(5));

    collector
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let mut pids = std::collections::HashSet::new();
    let mut buf = [0u8; 4];
    for _ in 0..10 {
        if collector.recv(&mut buf).is_ok() {
            pids.insert(u32::from_le_bytes(buf));
        }
    }

    assert_eq!(pids.len(), 10, "expected ten distinct worker pids");
    assert!(!pids.contains(&std::process::id()));
    drop(reporter);
}
