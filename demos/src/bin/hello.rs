// SPDX-License-Identifier: GPL-2.0-only

//! Ten items against each backend in turn, optionally with tracing
//! wired up to stdout. Mirrors the original library's `hello.c`: each
//! item sleeps briefly so the elastic pool is forced to grow a fresh
//! worker per item instead of reusing one that's already idle.

use std::io::stdout;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;
use workqueue_core::{trace, WorkQueue};

/// Run ten work items against the thread and process backends.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Install a trace sink that prints every internal event to stdout.
    #[arg(short = 't', long)]
    trace: bool,
}

fn hello(id: i64, arg: usize) {
    // Sleep to ensure each item gets a new worker.
    sleep(Duration::from_secs(1));
    println!("{id:04} Hello World! ({arg})");
}

fn run_backend(name: &str) {
    println!(" *** Using '{name}' backend. ***");
    let wq = WorkQueue::init(Some(name)).unwrap_or_else(|e| panic!("workqueue_init({name}): {e}"));

    for i in 0..10u64 {
        wq.submit(hello, (i + 1) as usize)
            .unwrap_or_else(|e| panic!("workqueue_submit({name}{i}): {e}"));
    }

    wq.lock();
    while !wq.idle() {
        wq.wait(0).expect("workqueue_wait");
    }
    wq.unlock();

    wq.destroy();
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter("info").init();

    if args.trace {
        trace::set_trace(trace::write_sink(stdout()));
    }

    run_backend("thread");

    #[cfg(unix)]
    run_backend("process");

    if !args.trace {
        println!(" *** Consider re-running this example with tracing enabled [-t]. ***");
    }
}
