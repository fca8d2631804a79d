//! Counter of active execution contexts that can be closed before a fork.
//!
//! The counter is a single signed integer with two disjoint regimes:
//!
//! - `UNBLOCKED(n) = n + 2`: contexts may be created freely, `n` are active.
//! - `BLOCKED(n) = n`: creation is suspended, `n` (at most one) still drain.
//!
//! so "exactly one active" and "blocked" are both single comparisons. The fast
//! path of [`enter`](ForkBarrier::enter) and [`exit`](ForkBarrier::exit) only
//! touches the atomic; the mutex and condvar are used solely to park threads
//! while the barrier is blocked.
//!
//! # Protocol
//!
//! ```ignore
//! barrier.enter();                       // the forking thread's own context
//! if barrier.block_if_single_active() {
//!     barrier.exit();                    // may also happen after the fork
//!     // fork()
//!     barrier.allow();                   // in the parent, and in the child
//! }
//! ```

use crate::error::fatal;

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicIsize, Ordering};

const fn unblocked(n: isize) -> isize {
    n + 2
}

const fn blocked(n: isize) -> isize {
    n
}

/// Snapshot of a [`ForkBarrier`], for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierState {
    /// New contexts may be created; `active` are alive.
    Open { active: usize },
    /// New contexts wait for [`ForkBarrier::allow`]; `draining` are alive.
    Blocked { draining: usize },
}

/// Quiescence barrier over active execution contexts.
pub struct ForkBarrier {
    count: AtomicIsize,
    // `false` between a successful block and the matching allow.
    fork_complete: Mutex<bool>,
    cv: Condvar,
}

impl ForkBarrier {
    /// Creates an open barrier with no active contexts.
    pub const fn new() -> Self {
        Self {
            count: AtomicIsize::new(unblocked(0)),
            fork_complete: parking_lot::const_mutex(true),
            cv: Condvar::new(),
        }
    }

    /// Registers one more active context.
    ///
    /// Waits for [`allow`](ForkBarrier::allow) if the barrier is blocked. The
    /// blocked check is repeated on every CAS retry, so no increment can slip
    /// in after a successful [`block_if_single_active`](ForkBarrier::block_if_single_active).
    pub fn enter(&self) {
        let mut count = self.count.load(Ordering::Acquire);

        loop {
            if count <= blocked(1) {
                let mut fork_complete = self.fork_complete.lock();

                // Blocking and allowing both happen under this lock, so the
                // flag is false for as long as the counter stays blocked.
                if self.count.load(Ordering::Acquire) <= blocked(1) {
                    tracing::debug!("waiting for fork to complete");

                    while !*fork_complete {
                        self.cv.wait(&mut fork_complete);
                    }
                }

                count = self.count.load(Ordering::Acquire);
                continue;
            }

            match self.count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => count = actual,
            }
        }
    }

    /// Deregisters an active context. Never blocks.
    pub fn exit(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Blocks creation of new contexts if the caller's context is the only
    /// active one. Returns false, leaving the barrier untouched, otherwise.
    pub fn block_if_single_active(&self) -> bool {
        let mut fork_complete = self.fork_complete.lock();

        let blocked = self
            .count
            .compare_exchange(
                unblocked(1),
                blocked(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok();

        if blocked {
            *fork_complete = false;
            tracing::debug!("execution contexts blocked for fork");
        }

        blocked
    }

    /// Reopens the barrier after a successful block and wakes all waiters.
    ///
    /// Contexts still draining when the barrier was blocked stay counted.
    /// Calling this without a matching block aborts the process.
    pub fn allow(&self) {
        let mut fork_complete = self.fork_complete.lock();

        let previous = self
            .count
            .fetch_add(unblocked(0) - blocked(0), Ordering::AcqRel);
        if previous > blocked(1) {
            drop(fork_complete);
            fatal("fork barrier allowed without a matching block");
        }

        *fork_complete = true;
        self.cv.notify_all();
        tracing::debug!("execution contexts allowed after fork");
    }

    /// Snapshot of the counter. Racy by nature; use it for assertions and
    /// logging only.
    pub fn state(&self) -> BarrierState {
        let count = self.count.load(Ordering::Acquire);

        if count <= blocked(1) {
            BarrierState::Blocked {
                draining: count.max(0) as usize,
            }
        } else {
            BarrierState::Open {
                active: (count - unblocked(0)) as usize,
            }
        }
    }

    /// Returns true between a successful block and the matching allow.
    pub fn is_blocked(&self) -> bool {
        matches!(self.state(), BarrierState::Blocked { .. })
    }
}

impl Default for ForkBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_active_contexts() {
        let barrier = ForkBarrier::new();
        assert_eq!(barrier.state(), BarrierState::Open { active: 0 });

        barrier.enter();
        barrier.enter();
        assert_eq!(barrier.state(), BarrierState::Open { active: 2 });

        barrier.exit();
        barrier.exit();
        assert_eq!(barrier.state(), BarrierState::Open { active: 0 });
    }

    #[test]
    fn block_requires_exactly_one_active() {
        let barrier = ForkBarrier::new();
        assert!(!barrier.block_if_single_active());

        barrier.enter();
        barrier.enter();
        assert!(!barrier.block_if_single_active());
        assert_eq!(barrier.state(), BarrierState::Open { active: 2 });

        barrier.exit();
        assert!(barrier.block_if_single_active());
        assert_eq!(barrier.state(), BarrierState::Blocked { draining: 1 });
    }

    #[test]
    fn allow_keeps_draining_context_counted() {
        let barrier = ForkBarrier::new();
        barrier.enter();
        assert!(barrier.block_if_single_active());

        barrier.allow();
        assert_eq!(barrier.state(), BarrierState::Open { active: 1 });

        barrier.exit();
        assert_eq!(barrier.state(), BarrierState::Open { active: 0 });
    }

    #[test]
    fn allow_after_drain_reopens_empty() {
        let barrier = ForkBarrier::new();
        barrier.enter();
        assert!(barrier.block_if_single_active());

        barrier.exit();
        assert_eq!(barrier.state(), BarrierState::Blocked { draining: 0 });

        barrier.allow();
        assert_eq!(barrier.state(), BarrierState::Open { active: 0 });
        assert!(!barrier.is_blocked());
    }
}
