//! Time source for the bounded poll loops.
//!
//! Bridge reads never block on the transport; they poll, sleep a short
//! interval, and check elapsed time. Both the reading of time and the sleep go
//! through [`Clock`] so tests can drive timeouts with [`ManualClock`] instead of
//! waiting on the wall clock.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time plus a way to wait.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Shared, type-erased clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time backed by [`std::time::Instant`] and [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Returns the process-wide wall clock as a [`SharedClock`].
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Deterministic clock for tests.
///
/// Time only moves when [`ManualClock::advance`] or [`Clock::sleep`] is
/// called; `sleep` returns immediately after advancing. Clones share the same
/// timeline, so a test can keep one handle while the adapter owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Total simulated time since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// Convert into a [`SharedClock`] that shares this timeline.
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_only_moves_when_told() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.sleep(Duration::from_millis(5));
        assert_eq!(clock.now() - t0, Duration::from_millis(5));

        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.elapsed(), Duration::from_millis(15));
    }

    #[test]
    fn test_manual_clock_clones_share_timeline() {
        let clock = ManualClock::new();
        let shared = clock.shared();
        shared.sleep(Duration::from_millis(7));
        assert_eq!(clock.elapsed(), Duration::from_millis(7));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() > a);
    }
}
