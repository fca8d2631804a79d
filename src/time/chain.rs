//! Thread-local stack of time frames.
//!
//! Every thread starts with the [`SystemClock`] as its root. Scoped guards
//! push frames on top and hold the index of their frame; the frame at
//! `index - 1` (or the root) is the one they fall back to. Guards must be
//! dropped in the reverse order of creation.
//!
//! The stack lives in [`NoDestruct`] storage and so outlives every other
//! thread-local: guards may be created from thread-local destructors.
//!
//! No borrow of the stack is held while a user-provided [`TimeSource`] runs,
//! so such sources may themselves read the clock.

use crate::error::fatal;
use crate::time::{SystemClock, TimeSource, Timestamp};
use crate::utils::NoDestruct;

use std::cell::RefCell;
use std::rc::Rc;

pub(crate) enum Frame {
    /// Caches the first reading taken from the frame below.
    Cache(Option<Timestamp>),
    /// Reports a fixed value.
    Fixed(Timestamp),
    /// Delegates to a user-provided source.
    Source(Rc<dyn TimeSource>),
}

// Frees the buffer at thread exit if no frame is left on it.
struct Reclaim;

impl Drop for Reclaim {
    fn drop(&mut self) {
        TIME_CHAIN.with(|frames| {
            if let Ok(mut frames) = frames.try_borrow_mut() {
                if frames.is_empty() {
                    *frames = Vec::new();
                }
            }
        });
    }
}

thread_local! {
    static TIME_CHAIN: NoDestruct<RefCell<Vec<Frame>>> =
        const { NoDestruct::new(RefCell::new(Vec::new())) };

    static RECLAIM: Reclaim = const { Reclaim };
}

// What a frame needs in order to answer `now`, computed under the borrow.
enum Lookup {
    Ready(Timestamp),
    Ask(Rc<dyn TimeSource>),
    Root,
    Refill,
}

/// Pushes `frame` and returns its index.
pub(crate) fn push(frame: Frame) -> usize {
    let _ = RECLAIM.try_with(|_| ());

    TIME_CHAIN.with(|frames| {
        let mut frames = frames.borrow_mut();
        frames.push(frame);
        frames.len() - 1
    })
}

/// Pops the frame at `index`, which must be the top of the stack.
pub(crate) fn pop(index: usize) {
    let frame = TIME_CHAIN.with(|frames| {
        let mut frames = frames.borrow_mut();
        if frames.len() != index + 1 {
            drop(frames);
            fatal("time source dropped out of order");
        }
        frames.pop()
    });

    // A user source may read the clock while being dropped.
    drop(frame);
}

/// Replaces the value of a cache or fixed frame.
pub(crate) fn set(index: usize, now: Timestamp) {
    TIME_CHAIN.with(|frames| match frames.borrow_mut().get_mut(index) {
        Some(Frame::Cache(cached)) => *cached = Some(now),
        Some(Frame::Fixed(fixed)) => *fixed = now,
        _ => {}
    });
}

/// Current time as seen by the top-most frame of the calling thread.
pub(crate) fn current_time() -> Timestamp {
    now_through(TIME_CHAIN.with(|frames| frames.borrow().len()))
}

/// Time as seen by the frame at `depth - 1`, or by the root if `depth` is 0.
pub(crate) fn now_through(depth: usize) -> Timestamp {
    let lookup = TIME_CHAIN.with(|frames| {
        let frames = frames.borrow();

        match depth.checked_sub(1).and_then(|index| frames.get(index)) {
            None => Lookup::Root,
            Some(Frame::Cache(Some(cached))) => Lookup::Ready(*cached),
            Some(Frame::Cache(None)) => Lookup::Refill,
            Some(Frame::Fixed(fixed)) => Lookup::Ready(*fixed),
            Some(Frame::Source(source)) => Lookup::Ask(source.clone()),
        }
    });

    match lookup {
        Lookup::Ready(now) => now,
        Lookup::Ask(source) => source.now(),
        Lookup::Root => SystemClock::global().now(),
        Lookup::Refill => {
            // Anything cached beneath us predates this query.
            invalidate_through(depth - 1);
            let now = now_through(depth - 1);

            TIME_CHAIN.with(|frames| {
                if let Some(Frame::Cache(cached)) = frames.borrow_mut().get_mut(depth - 1) {
                    *cached = Some(now);
                }
            });

            now
        }
    }
}

/// Invalidates the frames at `0..depth` and the root, top to bottom.
pub(crate) fn invalidate_through(depth: usize) {
    let sources = TIME_CHAIN.with(|frames| {
        let mut frames = frames.borrow_mut();
        let mut sources = Vec::new();
        let depth = depth.min(frames.len());

        for frame in frames[..depth].iter_mut().rev() {
            match frame {
                Frame::Cache(cached) => *cached = None,
                Frame::Fixed(_) => {}
                Frame::Source(source) => sources.push(source.clone()),
            }
        }

        sources
    });

    for source in sources {
        source.invalidate_cache();
    }
    SystemClock::global().invalidate_cache();
}

/// Number of frames on the calling thread's stack.
#[cfg(test)]
pub(crate) fn depth() -> usize {
    TIME_CHAIN.with(|frames| frames.borrow().len())
}
