//! `pthread_atfork` registration.
//!
//! The child of a fork inherits a copy of the fork barrier in whatever state
//! the forking thread left it, but none of the other threads. The child
//! handler installed here reopens the barrier and runs the polling engine
//! reset hook, so the single surviving thread can create contexts again.

use crate::fork::Fork;

use std::io;
use std::sync::OnceLock;

static INSTALLED: OnceLock<i32> = OnceLock::new();

/// Child handler called after fork().
///
/// # Safety
/// Called by the C runtime in the child process, where only the forking
/// thread exists.
unsafe extern "C" fn atfork_child() {
    Fork::postfork_child();
}

/// Registers the child handler with `pthread_atfork`. Only the first call
/// registers; later calls return the first call's result.
pub fn install() -> io::Result<()> {
    let code = *INSTALLED.get_or_init(|| {
        // SAFETY: `atfork_child` is a plain function that lives for the whole
        // program.
        let code = unsafe { libc::pthread_atfork(None, None, Some(atfork_child)) };
        tracing::debug!(code, "registered atfork child handler");
        code
    });

    if code == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(code))
    }
}
