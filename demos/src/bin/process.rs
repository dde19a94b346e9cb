// SPDX-License-Identifier: GPL-2.0-only

//! Smallest possible demo: one item on the `"process"` backend.

use workqueue_core::WorkQueue;

fn hello(id: i64, _arg: usize) {
    println!("{id:04} Hello World!");
}

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let wq = WorkQueue::init(Some("process")).expect("workqueue_init(process)");
    wq.submit(hello, 0).expect("workqueue_submit");

    wq.lock();
    while !wq.idle() {
        wq.wait(0).expect("workqueue_wait");
    }
    wq.unlock();

    wq.destroy();
}
