//! Storage for values that must never be destructed.
//!
//! Process-wide state that is read from thread-local destructors (or from the
//! destructors of other globals) cannot rely on any particular teardown
//! order. Values kept in a [`NoDestruct`] are simply never dropped, so every
//! reader sees a live object for as long as the process runs.
//!
//! # Example
//!
//! ```ignore
//! use exec_ctx::EternalSingleton;
//!
//! static REGISTRY: EternalSingleton<Vec<u32>> = EternalSingleton::new(|| vec![1, 2, 3]);
//!
//! assert_eq!(REGISTRY.get().len(), 3);
//! ```

use crate::error::AbortOnUnwind;

use std::fmt;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// Inline storage for a `T` whose destructor never runs.
///
/// The value is constructed eagerly by [`NoDestruct::new`] and lives in place,
/// without heap allocation. Dropping a `NoDestruct<T>` is a no-op: any
/// resources owned by `T` are leaked.
pub struct NoDestruct<T> {
    space: MaybeUninit<T>,
}

impl<T> NoDestruct<T> {
    /// Wraps `value`. It will never be dropped.
    pub const fn new(value: T) -> Self {
        Self {
            space: MaybeUninit::new(value),
        }
    }

    /// Returns a shared reference to the stored value.
    pub const fn get(&self) -> &T {
        // The only constructor initializes `space` and nothing ever moves the
        // value out.
        unsafe { self.space.assume_init_ref() }
    }

    /// Returns a mutable reference to the stored value.
    pub fn get_mut(&mut self) -> &mut T {
        unsafe { self.space.assume_init_mut() }
    }
}

impl<T> Deref for NoDestruct<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T> DerefMut for NoDestruct<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.get_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for NoDestruct<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NoDestruct").field(self.get()).finish()
    }
}

/// Process-wide instance of `T`, constructed once on first use and never
/// destructed.
///
/// Concurrent first calls to [`get`](EternalSingleton::get) race on a single
/// initialization; every caller observes the same fully constructed instance.
/// If the initializer panics the process is aborted rather than leaving a
/// poisoned or half-built singleton behind.
pub struct EternalSingleton<T, F = fn() -> T> {
    cell: OnceLock<NoDestruct<T>>,
    init: F,
}

impl<T, F> EternalSingleton<T, F> {
    /// Creates an empty singleton that will be filled by `init`.
    pub const fn new(init: F) -> Self {
        Self {
            cell: OnceLock::new(),
            init,
        }
    }

    /// Returns true once the instance has been constructed.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: Default> EternalSingleton<T> {
    /// Creates a singleton holding `T::default()`.
    pub const fn with_default() -> Self {
        Self::new(T::default)
    }
}

impl<T, F: Fn() -> T> EternalSingleton<T, F> {
    /// Returns the instance, constructing it on the first call.
    pub fn get(&self) -> &T {
        self.cell
            .get_or_init(|| {
                let guard = AbortOnUnwind("eternal singleton initializer panicked");
                let value = (self.init)();
                guard.disarm();

                NoDestruct::new(value)
            })
            .get()
    }
}

impl<T, F: Fn() -> T> Deref for EternalSingleton<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}
