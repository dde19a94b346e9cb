// SPDX-License-Identifier: GPL-2.0-only

//! Process-wide trace sink.
//!
//! The original library's `workqueue_trace` installs one global callback
//! that every `TRACE`/`WTRACE`/`WERROR` macro invocation forwards through.
//! This is the same idea, simplified to a single formatted string per call
//! (the caller formats; the sink just receives text) rather than a
//! `printf`-style varargs pointer. `tracing`'s leveled events remain the
//! crate's own internal log regardless of whether a caller installs a
//! sink here — the two are independent, not layered.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

type Sink = Arc<dyn Fn(&str) + Send + Sync>;

static TRACE_SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Installs a process-wide trace sink, replacing any previous one.
pub fn set_trace<F>(sink: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    *TRACE_SINK.lock() = Some(Arc::new(sink));
}

/// Removes the current trace sink, if any.
pub fn clear_trace() {
    *TRACE_SINK.lock() = None;
}

/// Forwards `line` to the installed sink, if one is set. Internal;
/// `controller`/backends call this alongside their `tracing` events.
pub(crate) fn emit(line: &str) {
    if let Some(sink) = TRACE_SINK.lock().as_ref() {
        sink(line);
    }
}

/// A ready-made sink that writes each traced line, newline-terminated, to
/// `writer` — the idiomatic Rust analogue of the original's
/// `workqueue_fprintf`, which forwarded the same callback signature
/// straight into `vfprintf`.
pub fn write_sink<W>(mut writer: W) -> impl Fn(&str) + Send + Sync
where
    W: Write + Send + 'static,
{
    let writer = Mutex::new(writer);
    move |line: &str| {
        let mut writer = writer.lock();
        let _ = writeln!(writer, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sink_receives_emitted_lines() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        set_trace(|_line| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        });
        emit("hello");
        emit("world");
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        clear_trace();
    }

    #[test]
    fn no_sink_is_a_silent_no_op() {
        clear_trace();
        emit("nobody is listening");
    }
}
