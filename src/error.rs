//! Error types and the fatal-violation path.
//!
//! Configuration is the only place that can fail recoverably. Everything else
//! in this crate is in-memory bookkeeping: a broken invariant there means the
//! per-thread stacks or the fork counter are already corrupt, so the process
//! is aborted instead of unwinding through code that would observe it.

use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held something that is not a boolean.
    #[error("invalid boolean value {value:?} for {key}")]
    InvalidBool { key: &'static str, value: String },

    /// An environment variable was set but not valid unicode.
    #[error("environment variable {key} is not valid unicode")]
    NotUnicode { key: &'static str },
}

/// Errors raised by [`Builder::init`](crate::Builder::init).
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Registering the fork handlers with the C runtime failed.
    #[error("failed to install atfork handlers")]
    AtFork(#[source] std::io::Error),
}

/// Logs a contract violation and aborts the process.
#[cold]
pub(crate) fn fatal(violation: &str) -> ! {
    tracing::error!(violation, "fatal contract violation, aborting");
    std::process::abort()
}

/// Aborts the process if dropped while armed.
///
/// Held across code that must not unwind out of a half-finished update.
pub(crate) struct AbortOnUnwind(pub(crate) &'static str);

impl AbortOnUnwind {
    pub(crate) fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        fatal(self.0);
    }
}
