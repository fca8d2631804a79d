//! Time utilities: timestamps and the per-thread chain of time sources.
//!
//! This module provides the clock used by execution contexts:
//!
//! - [`Timestamp`] for discrete points in time, in milliseconds
//! - [`TimeSource`] for anything that can tell the time
//! - [`SystemClock`] as the root source of every thread
//! - [`ScopedTimeCache`], [`ScopedTimeOverride`] and [`ScopedTimeSource`] for
//!   frames stacked on top of the root
//!
//! Each thread owns a stack of frames. [`Timestamp::now`] asks the top frame;
//! a frame that cannot answer by itself asks the frame below it.
//!
//! # Example: Frozen Clock
//!
//! ```ignore
//! use exec_ctx::time::ScopedTimeCache;
//!
//! let cache = ScopedTimeCache::new();
//! let first = cache.now();
//! // ... arbitrary work ...
//! assert_eq!(cache.now(), first);
//!
//! cache.invalidate_cache();
//! assert!(cache.now() >= first);
//! ```
//!
//! # Example: Overriding the Clock in Tests
//!
//! ```ignore
//! use exec_ctx::time::{ScopedTimeOverride, Timestamp};
//!
//! let clock = ScopedTimeOverride::new(Timestamp::from_millis(1_000));
//! assert_eq!(Timestamp::now().millis(), 1_000);
//! ```

mod chain;
pub mod scoped;

pub use scoped::{ScopedTimeCache, ScopedTimeOverride, ScopedTimeSource};
pub(crate) use scoped::FrameRef;

use crate::utils::EternalSingleton;

use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// A discrete point in time, in milliseconds since the process epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    millis: i64,
}

impl Timestamp {
    /// The process epoch.
    pub const EPOCH: Timestamp = Timestamp { millis: 0 };

    /// Creates a timestamp `millis` milliseconds after the process epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the process epoch.
    pub const fn millis(self) -> i64 {
        self.millis
    }

    /// Returns the current time as seen by the calling thread's current
    /// time source.
    pub fn now() -> Self {
        chain::current_time()
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        let delta = self.millis.saturating_sub(earlier.millis);
        Duration::from_millis(delta.max(0) as u64)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let delta = i64::try_from(rhs.as_millis()).unwrap_or(i64::MAX);
        Timestamp::from_millis(self.millis.saturating_add(delta))
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}ms", self.millis)
    }
}

/// Anything that can report the current time.
///
/// Sources that cache a reading override [`invalidate_cache`](TimeSource::invalidate_cache)
/// to drop it. Frames on a thread's chain have their invalidation forwarded
/// to every frame beneath them regardless of what this method does.
pub trait TimeSource {
    /// Returns the current time.
    fn now(&self) -> Timestamp;

    /// Drops any cached reading.
    fn invalidate_cache(&self) {}
}

static PROCESS_EPOCH: EternalSingleton<Instant> = EternalSingleton::new(Instant::now);

/// Monotonic clock counting milliseconds since the process epoch.
///
/// The epoch is fixed the first time any thread reads the clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub(crate) fn global() -> &'static SystemClock {
        static CLOCK: SystemClock = SystemClock;
        &CLOCK
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = PROCESS_EPOCH.get().elapsed().as_millis();
        Timestamp::from_millis(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}
