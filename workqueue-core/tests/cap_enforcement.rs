// SPDX-License-Identifier: GPL-2.0-only

//! The worker pool never grows past `num_workers`, even when far more
//! items are submitted than there are workers to run them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use workqueue_core::WorkQueue;

const CAP: usize = 3;
static BARRIER: std::sync::OnceLock<Arc<Barrier>> = std::sync::OnceLock::new();
static PEAK_CURRENT: AtomicUsize = AtomicUsize::new(0);

fn held_item(_id: i64, _arg: usize) {
    let barrier = BARRIER.get().expect("barrier installed before submit");
    barrier.wait();
}

#[test]
fn worker_count_never_exceeds_cap() {
    BARRIER.set(Arc::new(Barrier::new(CAP))).ok();

    let wq = WorkQueue::builder()
        .backend("thread")
        .num_workers(CAP as u32)
        .timeout_secs(5)
        .build()
        .expect("build");

    for i in 0..(CAP * 4) {
        wq.submit(held_item, i).expect("submit");
        PEAK_CURRENT.fetch_max(wq.stat().current as usize, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
    }

    wq.lock();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !wq.idle() && std::time::Instant::now() < deadline {
        let _ = wq.wait(1);
    }
    wq.unlock();

    assert!(
        PEAK_CURRENT.load(Ordering::SeqCst) <= CAP,
        "worker pool exceeded its cap of {CAP}"
    );
}
