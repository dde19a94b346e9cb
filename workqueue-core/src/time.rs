// SPDX-License-Identifier: GPL-2.0-only

//! Wallclock time source.
//!
//! Used only to compute absolute deadlines for the process backend's
//! process-shared condition variables, which must wait against
//! `CLOCK_REALTIME` rather than a per-process `Instant`.

/// A wallclock reading with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: i64,
}

impl Timestamp {
    /// Current `CLOCK_REALTIME` time.
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid, fully-initialized timespec; CLOCK_REALTIME
        // is always a supported clock id.
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        }
        Self {
            secs: ts.tv_sec,
            nanos: ts.tv_nsec as i64,
        }
    }

    /// This timestamp plus `secs` whole seconds, as a `libc::timespec`
    /// suitable for `pthread_cond_timedwait`. A `secs` of 0 is still a
    /// valid (immediate) deadline; callers decide whether 0 means
    /// "no timeout" before reaching here.
    pub fn plus_secs(self, secs: u32) -> libc::timespec {
        libc::timespec {
            tv_sec: self.secs + secs as i64,
            tv_nsec: self.nanos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_nonzero() {
        let t = Timestamp::now();
        assert!(t.secs > 0);
    }

    #[test]
    fn plus_secs_advances_seconds_only() {
        let t = Timestamp {
            secs: 1000,
            nanos: 42,
        };
        let deadline = t.plus_secs(10);
        assert_eq!(deadline.tv_sec, 1010);
        assert_eq!(deadline.tv_nsec, 42);
    }
}
