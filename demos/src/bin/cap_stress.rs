// SPDX-License-Identifier: GPL-2.0-only

//! Drives the elastic worker cap: submits more items than `--num-workers`
//! allows, holding every worker on a barrier so `available` stays `0` and
//! `current` is forced up to the cap, then releases them and confirms the
//! pool never grew past it.
//!
//! Thread backend only: `std::sync::Barrier` synchronizes threads within
//! one process and has no cross-process equivalent here, so holding
//! `"process"` workers on a barrier this way would simply deadlock each
//! child against a barrier count it can never reach alone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock};
use std::time::Duration;

use clap::Parser;
use workqueue_core::WorkQueue;

/// Stress the worker cap with more items than workers.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Worker cap.
    #[arg(short = 'n', long, default_value_t = 4)]
    num_workers: u32,

    /// Items to submit (should exceed `num_workers`).
    #[arg(short = 'i', long, default_value_t = 16)]
    num_items: u32,
}

struct Shared {
    barrier: Barrier,
    peak_current: AtomicUsize,
}

static SHARED: OnceLock<Arc<Shared>> = OnceLock::new();

fn held_item(_id: i64, _arg: usize) {
    let shared = SHARED.get().expect("shared state installed before submit");
    shared.barrier.wait();
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let shared = Arc::new(Shared {
        barrier: Barrier::new(args.num_workers as usize),
        peak_current: AtomicUsize::new(0),
    });
    SHARED.set(Arc::clone(&shared)).ok();

    let wq = WorkQueue::builder()
        .backend("thread")
        .num_workers(args.num_workers)
        .timeout_secs(5)
        .build()
        .unwrap_or_else(|e| panic!("workqueue init failed: {e}"));

    for i in 0..args.num_items {
        wq.submit(held_item, i as usize).expect("submit");
        let current = wq.stat().current as usize;
        shared.peak_current.fetch_max(current, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
    }

    wq.lock();
    while !wq.idle() {
        wq.wait(1).ok();
    }
    wq.unlock();

    let peak = shared.peak_current.load(Ordering::SeqCst);
    println!(
        "num_workers={} num_items={} peak_current={}",
        args.num_workers, args.num_items, peak
    );
    assert!(
        peak as u32 <= args.num_workers,
        "worker pool exceeded its cap: peak={peak} cap={}",
        args.num_workers
    );

    wq.destroy();
}
