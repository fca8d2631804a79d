//! Fork support: the process-wide switch, the context barrier and the child hook.
//!
//! Fork support is off by default. When it is off, [`Fork::inc_exec_ctx_count`]
//! and [`Fork::dec_exec_ctx_count`] reduce to one relaxed load, so builds that
//! never fork pay nothing for the barrier.
//!
//! # Example
//!
//! ```ignore
//! use exec_ctx::{ExecCtx, Fork};
//!
//! Fork::enable(true);
//!
//! let ctx = ExecCtx::new();
//! if Fork::block_exec_ctx() {
//!     drop(ctx);
//!     let pid = unsafe { libc::fork() };
//!     if pid == 0 {
//!         Fork::postfork_child();
//!     } else {
//!         Fork::allow_exec_ctx();
//!     }
//! }
//! ```

pub mod barrier;
mod threads;

#[cfg(unix)]
pub mod atfork;

pub use barrier::{BarrierState, ForkBarrier};

use crate::config::Config;
use crate::utils::EternalSingleton;
use threads::ThreadState;

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Hook run in the child after a fork to reset the polling engine.
pub type ChildPostforkFn = fn();

static SUPPORT_ENABLED: AtomicBool = AtomicBool::new(false);
static OVERRIDE_ENABLED: AtomicBool = AtomicBool::new(false);
// Stored as a raw pointer so the child can read it without taking a lock that
// a vanished thread may have held at fork time.
static RESET_CHILD_POLLING_ENGINE: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

static EXEC_CTX_BARRIER: EternalSingleton<ForkBarrier> = EternalSingleton::with_default();
static THREAD_STATE: EternalSingleton<ThreadState> = EternalSingleton::with_default();

/// Process-wide fork coordination.
pub struct Fork;

impl Fork {
    /// Applies `config` unless [`Fork::enable`] has already overridden it.
    pub fn global_init(config: &Config) {
        if OVERRIDE_ENABLED.load(Ordering::Acquire) {
            tracing::debug!("fork support overridden, ignoring configuration");
            return;
        }

        SUPPORT_ENABLED.store(config.fork_support, Ordering::Release);
        tracing::debug!(enabled = config.fork_support, "fork support configured");
    }

    /// Returns true if fork support is enabled.
    #[inline]
    pub fn enabled() -> bool {
        SUPPORT_ENABLED.load(Ordering::Relaxed)
    }

    /// Overrides the configured fork support. Must be called before any
    /// execution context is created.
    pub fn enable(enable: bool) {
        OVERRIDE_ENABLED.store(true, Ordering::Release);
        SUPPORT_ENABLED.store(enable, Ordering::Release);
    }

    /// The barrier counting active execution contexts.
    pub fn barrier() -> &'static ForkBarrier {
        EXEC_CTX_BARRIER.get()
    }

    /// Registers an active execution context, waiting out a pending fork.
    ///
    /// Returns whether the context was counted, which is the case only while
    /// fork support is enabled.
    #[inline]
    pub fn inc_exec_ctx_count() -> bool {
        if !Self::enabled() {
            return false;
        }

        Self::barrier().enter();
        true
    }

    /// Deregisters an execution context counted by [`Fork::inc_exec_ctx_count`].
    #[inline]
    pub fn dec_exec_ctx_count() {
        if Self::enabled() {
            Self::barrier().exit();
        }
    }

    /// Blocks creation of new execution contexts if the caller's is the only
    /// active one. Always false while fork support is disabled.
    pub fn block_exec_ctx() -> bool {
        Self::enabled() && Self::barrier().block_if_single_active()
    }

    /// Reopens execution context creation after [`Fork::block_exec_ctx`].
    pub fn allow_exec_ctx() {
        if Self::enabled() {
            Self::barrier().allow();
        }
    }

    /// Counts a thread owned by the runtime, such as a poller or timer
    /// thread. No-op while fork support is disabled.
    pub fn inc_thread_count() {
        if Self::enabled() {
            THREAD_STATE.get().inc();
        }
    }

    /// Uncounts a thread counted by [`Fork::inc_thread_count`] and wakes
    /// [`Fork::await_threads`] once none are left.
    pub fn dec_thread_count() {
        if Self::enabled() {
            THREAD_STATE.get().dec();
        }
    }

    /// Blocks until every thread counted by [`Fork::inc_thread_count`] is gone.
    pub fn await_threads() {
        if Self::enabled() {
            THREAD_STATE.get().await_threads();
        }
    }

    /// Number of threads currently counted.
    pub fn thread_count() -> usize {
        THREAD_STATE.get().active()
    }

    /// Sets the hook run in the child after a fork.
    pub fn set_reset_child_polling_engine_func(hook: ChildPostforkFn) {
        RESET_CHILD_POLLING_ENGINE.store(hook as *mut (), Ordering::Release);
    }

    /// The hook set by [`Fork::set_reset_child_polling_engine_func`], if any.
    ///
    /// # Returns
    ///
    /// `None` until a hook has been set. The read takes no lock, so it is
    /// safe in a freshly forked child.
    pub fn reset_child_polling_engine_func() -> Option<ChildPostforkFn> {
        let raw = RESET_CHILD_POLLING_ENGINE.load(Ordering::Acquire);
        if raw.is_null() {
            return None;
        }

        // SAFETY: the only non-null values stored are `ChildPostforkFn`s.
        Some(unsafe { std::mem::transmute::<*mut (), ChildPostforkFn>(raw) })
    }

    /// Runs in the child after a fork: reopens the barrier if the parent
    /// blocked it, then runs the polling engine reset hook.
    pub fn postfork_child() {
        if Self::enabled() && Self::barrier().is_blocked() {
            Self::barrier().allow();
        }

        if let Some(hook) = Self::reset_child_polling_engine_func() {
            hook();
        }
    }
}
