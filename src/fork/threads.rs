//! Accounting of threads owned by the runtime, so a fork can wait for them.

use crate::error::fatal;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Counts {
    active: usize,
    awaiting: bool,
    done: bool,
}

#[derive(Default)]
pub(crate) struct ThreadState {
    counts: Mutex<Counts>,
    cv: Condvar,
}

impl ThreadState {
    pub(crate) fn inc(&self) {
        self.counts.lock().active += 1;
    }

    pub(crate) fn dec(&self) {
        let mut counts = self.counts.lock();

        let Some(active) = counts.active.checked_sub(1) else {
            drop(counts);
            fatal("thread count decremented below zero");
        };
        counts.active = active;

        if counts.awaiting && counts.active == 0 {
            counts.done = true;
            self.cv.notify_all();
        }
    }

    /// Blocks until every counted thread has finished.
    pub(crate) fn await_threads(&self) {
        let mut counts = self.counts.lock();
        counts.awaiting = true;
        counts.done = counts.active == 0;

        while !counts.done {
            self.cv.wait(&mut counts);
        }
        counts.awaiting = false;
    }

    pub(crate) fn active(&self) -> usize {
        self.counts.lock().active
    }
}
