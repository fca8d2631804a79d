//! FIFO queue of deferred work owned by one execution context.
//!
//! Provides a queue that lets code running under a context push work to be
//! run later, and lets the context pop it back out in order when flushing.

use std::collections::VecDeque;
use std::fmt;

/// A unit of deferred work.
///
/// Work must not try to end the execution context it runs under.
pub type Work = Box<dyn FnOnce() + 'static>;

/// A FIFO queue of deferred work.
///
/// Only ever touched by the thread that owns the context, so no locking is
/// involved.
#[derive(Default)]
pub(crate) struct WorkQueue {
    items: VecDeque<Work>,
}

impl WorkQueue {
    /// Creates a new empty work queue.
    pub(crate) fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Enqueues work behind everything already queued.
    pub(crate) fn push(&mut self, work: Work) {
        self.items.push_back(work);
    }

    /// Dequeues the oldest queued work, if any.
    pub(crate) fn pop(&mut self) -> Option<Work> {
        self.items.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.items.len())
            .finish()
    }
}
