//! Scoped time sources stacked on the calling thread's chain.
//!
//! Creating one of these guards makes it the thread's current time source;
//! dropping it restores whatever was current before. Guards are `!Send` and
//! must be dropped in reverse creation order.

use crate::time::chain::{self, Frame};
use crate::time::{TimeSource, Timestamp};

use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

// Ties a guard to the thread whose chain it lives on.
type NotSend = PhantomData<*const ()>;

/// Index of a cache frame, usable without borrowing its guard.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameRef(usize);

impl FrameRef {
    pub(crate) fn now(self) -> Timestamp {
        chain::now_through(self.0 + 1)
    }

    pub(crate) fn invalidate(self) {
        chain::invalidate_through(self.0 + 1);
    }

    pub(crate) fn set(self, now: Timestamp) {
        chain::set(self.0, now);
    }
}

/// A frame that reads the time once and keeps reporting that reading.
///
/// Two consecutive [`now`](ScopedTimeCache::now) calls without an
/// intervening [`invalidate_cache`](ScopedTimeCache::invalidate_cache) return
/// the same value, so a unit of work sees a stable clock.
pub struct ScopedTimeCache {
    index: usize,
    _not_send: NotSend,
}

impl ScopedTimeCache {
    /// Pushes an empty cache frame as the thread's current time source.
    pub fn new() -> Self {
        Self {
            index: chain::push(Frame::Cache(None)),
            _not_send: PhantomData,
        }
    }

    /// Returns the cached reading, filling it from the previous frame first if
    /// necessary. The previous frame is invalidated before it is queried.
    pub fn now(&self) -> Timestamp {
        chain::now_through(self.index + 1)
    }

    /// Drops the cached reading and invalidates every frame beneath.
    pub fn invalidate_cache(&self) {
        chain::invalidate_through(self.index + 1);
    }

    /// Seeds the cache with `now`.
    pub fn test_only_set_now(&self, now: Timestamp) {
        chain::set(self.index, now);
    }

    pub(crate) fn frame(&self) -> FrameRef {
        FrameRef(self.index)
    }
}

impl Default for ScopedTimeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ScopedTimeCache {
    fn now(&self) -> Timestamp {
        ScopedTimeCache::now(self)
    }

    fn invalidate_cache(&self) {
        ScopedTimeCache::invalidate_cache(self)
    }
}

impl Drop for ScopedTimeCache {
    fn drop(&mut self) {
        chain::pop(self.index);
    }
}

/// A frame frozen at a settable timestamp.
pub struct ScopedTimeOverride {
    index: usize,
    _not_send: NotSend,
}

impl ScopedTimeOverride {
    /// Makes `now` the thread's current time until the guard is dropped.
    pub fn new(now: Timestamp) -> Self {
        Self {
            index: chain::push(Frame::Fixed(now)),
            _not_send: PhantomData,
        }
    }

    /// Moves the frozen clock to `now`.
    pub fn set(&self, now: Timestamp) {
        chain::set(self.index, now);
    }

    /// Moves the frozen clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.set(self.now() + by);
    }

    /// The frozen time.
    pub fn now(&self) -> Timestamp {
        chain::now_through(self.index + 1)
    }
}

impl TimeSource for ScopedTimeOverride {
    fn now(&self) -> Timestamp {
        ScopedTimeOverride::now(self)
    }

    fn invalidate_cache(&self) {
        chain::invalidate_through(self.index + 1);
    }
}

impl Drop for ScopedTimeOverride {
    fn drop(&mut self) {
        chain::pop(self.index);
    }
}

/// Installs an arbitrary [`TimeSource`] as the thread's current source.
pub struct ScopedTimeSource {
    index: usize,
    _not_send: NotSend,
}

impl ScopedTimeSource {
    /// Pushes `source` until the guard is dropped.
    pub fn new(source: Rc<dyn TimeSource>) -> Self {
        Self {
            index: chain::push(Frame::Source(source)),
            _not_send: PhantomData,
        }
    }

    /// Asks the installed source for the time.
    pub fn now(&self) -> Timestamp {
        chain::now_through(self.index + 1)
    }

    /// Invalidates the installed source and every frame beneath.
    pub fn invalidate_cache(&self) {
        chain::invalidate_through(self.index + 1);
    }
}

impl Drop for ScopedTimeSource {
    fn drop(&mut self) {
        chain::pop(self.index);
    }
}
