//! Monotonic run clock
//!
//! All issue and completion timestamps come from a single monotonic
//! high-resolution clock anchored at run start. Wall-clock time is used only
//! for the summary header. Reads must stay cheap enough to sit on the issue
//! and completion hot paths.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic clock anchored at run start.
///
/// Copyable so every thread can carry its own handle without sharing.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    origin: Instant,
}

impl RunClock {
    /// Anchor a new clock at the current instant.
    ///
    /// The clock is pre-warmed with a burst of reads so the first measured
    /// timestamp does not pay any lazy-initialization cost inside the OS
    /// time source.
    #[must_use]
    pub fn start() -> Self {
        let clock = Self {
            origin: Instant::now(),
        };
        clock.prewarm();
        clock
    }

    /// Nanoseconds elapsed since run start.
    ///
    /// Saturates at `u64::MAX`, which is over five centuries of run time.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now_ns(&self) -> u64 {
        let nanos = self.origin.elapsed().as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }

    /// Elapsed time since run start as a `Duration`.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Sleep until `target_ns` on this clock, spinning for the final stretch.
    ///
    /// `thread::sleep` routinely overshoots by tens of microseconds; the
    /// scheduler sleeps to within [`SPIN_SLACK`] of the target and spins the
    /// remainder so issue times track the schedule tightly.
    pub fn sleep_until_ns(&self, target_ns: u64) {
        const SPIN_SLACK_NS: u64 = 200_000;
        loop {
            let now = self.now_ns();
            if now >= target_ns {
                return;
            }
            let remaining = target_ns - now;
            if remaining > SPIN_SLACK_NS {
                std::thread::sleep(Duration::from_nanos(remaining - SPIN_SLACK_NS));
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn prewarm(&self) {
        let mut acc = 0u64;
        for _ in 0..64 {
            acc = acc.wrapping_add(self.now_ns());
        }
        std::hint::black_box(acc);
    }
}

/// Wall-clock seconds since the Unix epoch, for summary headers only.
#[must_use]
pub fn wall_clock_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
