//! Application callback contexts.
//!
//! Completion callbacks handed back to the application must not run while
//! the runtime still holds internal state on the stack. They are collected by
//! the outermost [`ApplicationCallbackCtx`] of the thread and run, in order,
//! when that context ends. Nested instances are inert.
//!
//! The queue lives in [`NoDestruct`] storage, so callback contexts work from
//! thread-local destructors too.

use crate::fork::Fork;
use crate::utils::NoDestruct;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;

type Callback = Box<dyn FnOnce(bool) + 'static>;

#[derive(Default)]
struct CallbackQueue {
    callbacks: VecDeque<(Callback, bool)>,
}

thread_local! {
    /// Callbacks of the installed context, if the thread has one.
    static CALLBACK_CTX: NoDestruct<RefCell<Option<CallbackQueue>>> =
        const { NoDestruct::new(RefCell::new(None)) };
}

/// Collects application callbacks and runs them when the outermost instance
/// on the thread is dropped.
pub struct ApplicationCallbackCtx {
    installed: bool,
    registered: bool,
    _not_send: PhantomData<*const ()>,
}

impl ApplicationCallbackCtx {
    /// Creates a context counted by the fork barrier.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Creates a context for an internal thread, not counted by the fork
    /// barrier.
    pub fn internal() -> Self {
        Self::build(true)
    }

    fn build(internal_thread: bool) -> Self {
        if Self::available() {
            return Self {
                installed: false,
                registered: false,
                _not_send: PhantomData,
            };
        }

        let registered = !internal_thread && Fork::inc_exec_ctx_count();
        CALLBACK_CTX.with(|ctx| *ctx.borrow_mut() = Some(CallbackQueue::default()));
        tracing::trace!(registered, "installed application callback context");

        Self {
            installed: true,
            registered,
            _not_send: PhantomData,
        }
    }

    /// Returns true if the calling thread has an installed context.
    pub fn available() -> bool {
        CALLBACK_CTX.with(|ctx| ctx.borrow().is_some())
    }

    /// Queues `callback` to run with `ok` when the installed context ends.
    ///
    /// Without an installed context, the callback runs before this returns.
    pub fn enqueue<F>(callback: F, ok: bool)
    where
        F: FnOnce(bool) + 'static,
    {
        let mut callback: Option<Callback> = Some(Box::new(callback));

        CALLBACK_CTX.with(|ctx| {
            if let Some(queue) = ctx.borrow_mut().as_mut() {
                if let Some(callback) = callback.take() {
                    queue.callbacks.push_back((callback, ok));
                }
            }
        });

        if let Some(callback) = callback {
            let _ctx = Self::new();
            Self::enqueue(callback, ok);
        }
    }

    /// Returns true if this instance is the one collecting callbacks.
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

impl Default for ApplicationCallbackCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ApplicationCallbackCtx {
    fn drop(&mut self) {
        if !self.installed {
            return;
        }

        let next = || {
            CALLBACK_CTX.with(|ctx| {
                ctx.borrow_mut()
                    .as_mut()
                    .and_then(|queue| queue.callbacks.pop_front())
            })
        };

        while let Some((callback, ok)) = next() {
            callback(ok);
        }

        CALLBACK_CTX.with(|ctx| ctx.borrow_mut().take());

        if self.registered {
            Fork::barrier().exit();
        }

        tracing::trace!("removed application callback context");
    }
}
