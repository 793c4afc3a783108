//! Wall and monotonic clocks with test doubles.
//!
//! The avalanche subsystem reads two clocks: wall seconds for the
//! conflicting-proof cooldown, and a monotonic clock for per-node request
//! scheduling. Both are behind the [`Clock`] trait so tests can advance
//! time deterministically.
//!
//! [`SteadyTime`] replaces `std::time::Instant` in public signatures.
//! `Instant` values cannot be fabricated, which makes mock clocks
//! impossible; a duration since an arbitrary process-local origin carries
//! the same ordering guarantees and is trivially constructible.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A point on a monotonic timeline, measured from a process-local origin.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct SteadyTime(Duration);

impl SteadyTime {
    /// The origin of the timeline.
    pub const ZERO: SteadyTime = SteadyTime(Duration::ZERO);

    /// The far end of the timeline, usable as a range bound.
    pub const MAX: SteadyTime = SteadyTime(Duration::MAX);

    pub const fn from_duration(d: Duration) -> Self {
        SteadyTime(d)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl std::ops::Add<Duration> for SteadyTime {
    type Output = SteadyTime;

    fn add(self, rhs: Duration) -> SteadyTime {
        SteadyTime(self.0 + rhs)
    }
}

/// Source of wall-clock seconds and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall time, in seconds since the Unix epoch.
    fn seconds(&self) -> i64;

    /// Current monotonic time.
    fn steady(&self) -> SteadyTime;
}

/// The system clock.
///
/// The monotonic origin is the moment this clock was constructed.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64
    }

    fn steady(&self) -> SteadyTime {
        SteadyTime(self.origin.elapsed())
    }
}

/// A manually advanced clock for tests.
///
/// Both timelines move together through [`MockClock::advance`]; wall
/// seconds can also be pinned directly with [`MockClock::set_seconds`].
pub struct MockClock {
    seconds: AtomicI64,
    steady: Mutex<Duration>,
}

impl MockClock {
    pub fn new(start_seconds: i64) -> Self {
        Self {
            seconds: AtomicI64::new(start_seconds),
            steady: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, d: Duration) {
        self.seconds.fetch_add(d.as_secs() as i64, Ordering::SeqCst);
        *self.steady.lock() += d;
    }

    /// Pin wall seconds to an absolute value.
    pub fn set_seconds(&self, seconds: i64) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn seconds(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }

    fn steady(&self) -> SteadyTime {
        SteadyTime(*self.steady.lock())
    }
}
