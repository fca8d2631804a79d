//! Thread-local stack of execution context state.
//!
//! This module owns the per-thread storage behind [`ExecCtx`](crate::ExecCtx).
//! Each live context has one entry on its thread's stack; guards and handles
//! refer to it by a [`Slot`]: its index plus the generation it was created
//! with. The "current" slot names the innermost context and is restored to the
//! saved previous value when that context ends.
//!
//! The stack is kept in [`NoDestruct`] storage, which has no thread-local
//! destructor, so contexts stay usable from the destructors of other
//! thread-locals. A reclaim guard frees the stack's buffer at thread exit when
//! nothing is left on it.
//!
//! # Safety
//!
//! The stack is never shared across threads, so plain `RefCell` and `Cell`
//! suffice. No borrow is held while user code runs: callers copy what they
//! need out through [`with_state`] and release the borrow before calling
//! into deferred work or readiness checks.

use crate::error::fatal;
use crate::runtime::exec_ctx::ExecCtxFlags;
use crate::runtime::queue::WorkQueue;
use crate::time::FrameRef;
use crate::utils::NoDestruct;

use std::cell::{Cell, RefCell};

/// Readiness predicate consulted by `is_ready_to_finish`.
pub(crate) type ReadyCheck = Box<dyn FnMut() -> bool + 'static>;

/// Position of a context on its thread's stack.
///
/// The generation tells apart contexts that reuse the same index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) index: usize,
    generation: u64,
}

/// Per-context state kept on the thread's stack.
pub(crate) struct CtxState {
    pub(crate) flags: ExecCtxFlags,
    pub(crate) pending: WorkQueue,
    pub(crate) ready_check: Option<ReadyCheck>,
    pub(crate) time: FrameRef,
    generation: u64,
}

impl CtxState {
    pub(crate) fn new(flags: ExecCtxFlags, ready_check: Option<ReadyCheck>, time: FrameRef) -> Self {
        Self {
            flags,
            pending: WorkQueue::new(),
            ready_check,
            time,
            generation: 0,
        }
    }
}

/// Frees the stack's buffer at thread exit if no context is left on it.
struct Reclaim;

impl Drop for Reclaim {
    fn drop(&mut self) {
        EXEC_CTX_STACK.with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                if stack.is_empty() {
                    *stack = Vec::new();
                }
            }
        });
    }
}

thread_local! {
    /// Thread-local stack of live contexts, innermost last.
    static EXEC_CTX_STACK: NoDestruct<RefCell<Vec<CtxState>>> =
        const { NoDestruct::new(RefCell::new(Vec::new())) };

    /// Thread-local slot of the current context.
    static CURRENT_EXEC_CTX: Cell<Option<Slot>> = const { Cell::new(None) };

    /// Generation handed to the next context created on this thread.
    static NEXT_GENERATION: Cell<u64> = const { Cell::new(0) };

    static RECLAIM: Reclaim = const { Reclaim };
}

/// Pushes `state` and makes it current.
///
/// Returns its slot and the slot that was current before.
pub(crate) fn enter(mut state: CtxState) -> (Slot, Option<Slot>) {
    // Fails once the thread is past its own reclaim; the buffer then leaks.
    let _ = RECLAIM.try_with(|_| ());

    let generation = NEXT_GENERATION.with(|next| {
        let generation = next.get();
        next.set(generation.wrapping_add(1));
        generation
    });
    state.generation = generation;

    let index = EXEC_CTX_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(state);
        stack.len() - 1
    });

    let slot = Slot { index, generation };
    let previous = CURRENT_EXEC_CTX.with(|current| current.replace(Some(slot)));
    (slot, previous)
}

/// Pops the context at `slot` and restores `previous` as current.
///
/// `slot` must be both the innermost and the current context.
pub(crate) fn leave(slot: Slot, previous: Option<Slot>) {
    let state = EXEC_CTX_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let current = CURRENT_EXEC_CTX.with(Cell::get);

        if stack.len() != slot.index + 1 || current != Some(slot) {
            drop(stack);
            fatal("execution context dropped out of order");
        }

        stack.pop()
    });

    CURRENT_EXEC_CTX.with(|current| current.set(previous));

    // Captured values may touch the stack when dropped.
    drop(state);
}

/// Slot of the current context, if any.
pub(crate) fn current() -> Option<Slot> {
    CURRENT_EXEC_CTX.with(Cell::get)
}

/// Runs `function` on the state of the context at `slot`.
///
/// Aborts if that context has ended. `function` must not call back into user
/// code.
pub(crate) fn with_state<R>(slot: Slot, function: impl FnOnce(&mut CtxState) -> R) -> R {
    EXEC_CTX_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();

        let live = stack
            .get(slot.index)
            .is_some_and(|state| state.generation == slot.generation);
        if !live {
            drop(stack);
            fatal("execution context handle used after its context ended");
        }

        function(&mut stack[slot.index])
    })
}

/// Number of live contexts on the calling thread.
pub(crate) fn depth() -> usize {
    EXEC_CTX_STACK.with(|stack| stack.borrow().len())
}
