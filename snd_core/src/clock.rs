//! Wall-clock timestamps for scheduling deadlines (`next_flush_time`,
//! `ts` on AudioShm, paced-device throttle windows).
//!
//! Splits a realtime-unsafe `now()` from a cached, realtime-safe
//! `cached_now()`/`tick()` pair, since the audio thread must never call a
//! syscall on its hot path.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Monotonic timestamp in microseconds since server start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClockTime(pub u64);

impl ClockTime {
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn checked_duration_since(&self, earlier: ClockTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(Duration::from_micros)
    }

    pub fn saturating_add(&self, d: Duration) -> ClockTime {
        ClockTime(self.0.saturating_add(d.as_micros() as u64))
    }
}

/// Process-wide monotonic clock shared by the main thread and the audio
/// thread.
pub struct ClockSync {
    start: Instant,
    cached: AtomicU64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self { start: Instant::now(), cached: AtomicU64::new(0) }
    }

    /// Read the clock directly. Not realtime-safe: calls `Instant::elapsed`.
    /// Use from the main thread, or from the audio thread only between poll
    /// iterations when updating the cache via [`Self::tick`].
    #[inline]
    pub fn now(&self) -> ClockTime {
        ClockTime(self.start.elapsed().as_micros() as u64)
    }

    /// Refresh the cached time. Call once per audio-thread loop iteration.
    pub fn tick(&self) -> ClockTime {
        let t = self.now();
        self.cached.store(t.0, Ordering::Relaxed);
        t
    }

    /// Realtime-safe read of the last value stashed by [`Self::tick`].
    #[inline]
    pub fn cached_now(&self) -> ClockTime {
        ClockTime(self.cached.load(Ordering::Relaxed))
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn now_is_monotonic() {
        let clock = ClockSync::new();
        let t1 = clock.now();
        thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 > t1);
    }

    #[test]
    fn tick_updates_cached_now() {
        let clock = ClockSync::new();
        clock.tick();
        let c1 = clock.cached_now();
        thread::sleep(Duration::from_millis(5));
        clock.tick();
        let c2 = clock.cached_now();
        assert!(c2 > c1);
    }
}
