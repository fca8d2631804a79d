//! Execution contexts: the thread-local "current unit of work".
//!
//! An [`ExecCtx`] collects work deferred by the code running under it and
//! runs that work when flushed or when the context ends. Contexts nest in
//! strict LIFO order on one thread; the innermost one is current and can be
//! reached from anywhere on that thread through [`ExecCtx::current`].
//!
//! Every context also owns a time cache frame, so all code running under it
//! sees the same [`Timestamp`] until [`ExecCtx::invalidate_now`] is called.
//!
//! # Example
//!
//! ```ignore
//! use exec_ctx::ExecCtx;
//!
//! let ctx = ExecCtx::new();
//! ctx.enqueue(|| println!("runs on flush"));
//! ctx.enqueue(|| {
//!     ExecCtx::current().unwrap().enqueue(|| println!("runs after the first"));
//! });
//! assert!(ctx.flush());
//! assert!(!ctx.flush());
//! ```

use crate::fork::Fork;
use crate::runtime::context::{self, CtxState, ReadyCheck, Slot};
use crate::time::{ScopedTimeCache, Timestamp};

use std::marker::PhantomData;

bitflags::bitflags! {
    /// Behavior flags of an [`ExecCtx`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ExecCtxFlags: u32 {
        /// The context is ready to finish, either from the start or latched
        /// once its readiness check passed.
        const IS_FINISHED = 1;
        /// The thread may be owned by a call or channel: do not destroy those
        /// from within this context.
        const THREAD_RESOURCE_LOOP = 2;
        /// Created by an internal thread and not counted by the fork barrier.
        const IS_INTERNAL_THREAD = 4;
    }
}

/// Handle to a live execution context on the calling thread.
///
/// Obtained from [`ExecCtx::current`] or [`ExecCtx::handle`]. Using a handle
/// after its context has ended aborts the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentExecCtx {
    slot: Slot,
    _not_send: PhantomData<*const ()>,
}

impl CurrentExecCtx {
    /// Nesting depth of the context on its thread, starting at 0.
    pub fn depth(self) -> usize {
        self.slot.index
    }

    /// The context's current flags, including a latched
    /// [`ExecCtxFlags::IS_FINISHED`].
    pub fn flags(self) -> ExecCtxFlags {
        context::with_state(self.slot, |state| state.flags)
    }

    /// Appends `work` to the context's pending work. Never blocks.
    pub fn enqueue<F>(self, work: F)
    where
        F: FnOnce() + 'static,
    {
        context::with_state(self.slot, |state| state.pending.push(Box::new(work)));
    }

    /// Returns true if work is waiting for the next flush.
    pub fn has_pending_work(self) -> bool {
        context::with_state(self.slot, |state| !state.pending.is_empty())
    }

    /// Number of queued work items.
    pub fn pending_len(self) -> usize {
        context::with_state(self.slot, |state| state.pending.len())
    }

    /// Runs pending work in enqueue order until none is left, including work
    /// enqueued while flushing. Returns true if anything ran.
    ///
    /// The caller must not hold any lock the pending work could need.
    pub fn flush(self) -> bool {
        let mut ran = 0usize;

        while let Some(work) = context::with_state(self.slot, |state| state.pending.pop()) {
            work();
            ran += 1;
        }

        if ran > 0 {
            tracing::trace!(ctx = self.slot.index, ran, "flushed execution context");
        }

        ran > 0
    }

    /// Returns true if the context should be left as soon as possible.
    ///
    /// Once this returns true it keeps returning true: the first positive
    /// answer of the readiness check is latched into
    /// [`ExecCtxFlags::IS_FINISHED`].
    pub fn is_ready_to_finish(self) -> bool {
        let check = context::with_state(self.slot, |state| {
            if state.flags.contains(ExecCtxFlags::IS_FINISHED) {
                None
            } else {
                Some(state.ready_check.take())
            }
        });

        let Some(check) = check else {
            return true;
        };

        let mut put_back = PutBack {
            slot: self.slot,
            check,
        };
        let ready = put_back.check.as_mut().is_some_and(|check| check());
        drop(put_back);

        if ready {
            context::with_state(self.slot, |state| state.flags.insert(ExecCtxFlags::IS_FINISHED));
        }

        ready
    }

    /// The context's cached view of the current time.
    pub fn now(self) -> Timestamp {
        context::with_state(self.slot, |state| state.time).now()
    }

    /// Forces the next [`now`](CurrentExecCtx::now) to read the clock again.
    pub fn invalidate_now(self) {
        context::with_state(self.slot, |state| state.time).invalidate();
    }

    /// Seeds the context's time cache with `now`.
    pub fn test_only_set_now(self, now: Timestamp) {
        context::with_state(self.slot, |state| state.time).set(now);
    }
}

// Returns a readiness check to its context, also when the check panics.
struct PutBack {
    slot: Slot,
    check: Option<ReadyCheck>,
}

impl Drop for PutBack {
    fn drop(&mut self) {
        let check = self.check.take();
        context::with_state(self.slot, |state| state.ready_check = check);
    }
}

/// A thread-local unit of work.
///
/// Creating one makes it the thread's current context; dropping it sets
/// [`ExecCtxFlags::IS_FINISHED`], runs all pending work, and restores the
/// context that was current before. Unless flagged
/// [`ExecCtxFlags::IS_INTERNAL_THREAD`], a context is counted by the fork
/// barrier for its whole lifetime, and creating one waits while a fork is in
/// progress.
pub struct ExecCtx {
    handle: CurrentExecCtx,
    previous: Option<Slot>,
    registered: bool,
    // Declared last: its frame is popped after the context has left.
    time_cache: ScopedTimeCache,
}

impl ExecCtx {
    /// Creates a context that is finished from the start.
    pub fn new() -> Self {
        Self::with_flags(ExecCtxFlags::IS_FINISHED)
    }

    /// Creates a context with `flags` and no readiness check.
    ///
    /// Unless `flags` contains [`ExecCtxFlags::IS_FINISHED`], the context
    /// never reports itself ready to finish.
    pub fn with_flags(flags: ExecCtxFlags) -> Self {
        Self::build(flags, None)
    }

    /// Creates a context whose readiness is decided by `check`.
    ///
    /// `check` runs on every [`is_ready_to_finish`](ExecCtx::is_ready_to_finish)
    /// call until it first returns true.
    pub fn with_ready_check<F>(flags: ExecCtxFlags, check: F) -> Self
    where
        F: FnMut() -> bool + 'static,
    {
        let check: ReadyCheck = Box::new(check);
        Self::build(flags, Some(check))
    }

    fn build(flags: ExecCtxFlags, ready_check: Option<ReadyCheck>) -> Self {
        let registered = !flags.contains(ExecCtxFlags::IS_INTERNAL_THREAD) && Fork::inc_exec_ctx_count();

        let time_cache = ScopedTimeCache::new();
        let (slot, previous) = context::enter(CtxState::new(flags, ready_check, time_cache.frame()));
        tracing::trace!(ctx = slot.index, ?flags, registered, "entered execution context");

        Self {
            handle: CurrentExecCtx {
                slot,
                _not_send: PhantomData,
            },
            previous,
            registered,
            time_cache,
        }
    }

    /// Runs `function` under a new context with `flags`, then ends it.
    ///
    /// Similar to creating and dropping a context by hand, but keeps the
    /// context's lifetime visibly scoped.
    pub fn scope<F, R>(flags: ExecCtxFlags, function: F) -> R
    where
        F: FnOnce(&ExecCtx) -> R,
    {
        let ctx = Self::with_flags(flags);
        function(&ctx)
    }

    /// The calling thread's current context, if any.
    pub fn current() -> Option<CurrentExecCtx> {
        context::current().map(|slot| CurrentExecCtx {
            slot,
            _not_send: PhantomData,
        })
    }

    /// Returns true if the calling thread has a current context.
    pub fn is_active() -> bool {
        context::current().is_some()
    }

    /// Number of live contexts on the calling thread.
    pub fn active_on_thread() -> usize {
        context::depth()
    }

    /// Returns a copyable handle to this context.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ctx = ExecCtx::new();
    /// assert_eq!(ExecCtx::current(), Some(ctx.handle()));
    /// ```
    pub fn handle(&self) -> CurrentExecCtx {
        self.handle
    }

    /// See [`CurrentExecCtx::flags`].
    pub fn flags(&self) -> ExecCtxFlags {
        self.handle.flags()
    }

    /// Defers `work` until the next flush of this context.
    pub fn enqueue<F>(&self, work: F)
    where
        F: FnOnce() + 'static,
    {
        self.handle.enqueue(work);
    }

    /// Runs all pending work in enqueue order.
    ///
    /// # Returns
    ///
    /// `true` if at least one work item ran.
    pub fn flush(&self) -> bool {
        self.handle.flush()
    }

    /// See [`CurrentExecCtx::is_ready_to_finish`].
    pub fn is_ready_to_finish(&self) -> bool {
        self.handle.is_ready_to_finish()
    }

    /// The time as cached by this context, stable until invalidated.
    pub fn now(&self) -> Timestamp {
        self.time_cache.now()
    }

    /// Drops the cached time so the next [`now`](ExecCtx::now) reads the
    /// clock again.
    pub fn invalidate_now(&self) {
        self.time_cache.invalidate_cache();
    }

    /// Seeds the context's time cache with `now`.
    pub fn test_only_set_now(&self, now: Timestamp) {
        self.time_cache.test_only_set_now(now);
    }
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecCtx {
    fn drop(&mut self) {
        let slot = self.handle.slot;

        context::with_state(slot, |state| state.flags.insert(ExecCtxFlags::IS_FINISHED));
        self.handle.flush();
        context::leave(slot, self.previous);

        if self.registered {
            Fork::barrier().exit();
        }

        tracing::trace!(ctx = slot.index, "left execution context");
    }
}

/// Defers `work` to the current context, or runs it under a temporary
/// context if the thread has none.
pub fn run_later<F>(work: F)
where
    F: FnOnce() + 'static,
{
    match ExecCtx::current() {
        Some(ctx) => ctx.enqueue(work),
        None => ExecCtx::new().enqueue(work),
    }
}
