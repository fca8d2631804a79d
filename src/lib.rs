//! Thread-local execution contexts, fork quiescence and cached time sources.
//!
//! This crate provides the bookkeeping layer a request-processing runtime uses
//! to track deferred work per thread and to stop the world before a process
//! fork.
//!
//! # Architecture
//!
//! - **ExecCtx**: Thread-local, stack-disciplined unit of work owning deferred work and a time cache
//! - **ApplicationCallbackCtx**: Outermost-only context that runs application callbacks on exit
//! - **Fork**: Process-wide fork support switch, child post-fork hook and thread accounting
//! - **ForkBarrier**: Counter of active contexts that can be driven into a blocked state
//! - **Timestamp / TimeSource**: Per-thread chain of clock frames with invalidation propagation
//! - **EternalSingleton**: Process-wide storage that is constructed once and never destructed
//! - **Builder**: Fluent configuration layered over the environment

mod builder;
mod config;
mod error;
pub mod fork;
pub mod runtime;
pub mod time;
pub mod utils;

pub use builder::Builder;
pub use config::{Config, ENABLE_FORK_SUPPORT_ENV};
pub use error::{ConfigError, InitError};
pub use fork::{BarrierState, ChildPostforkFn, Fork, ForkBarrier};
pub use runtime::{ApplicationCallbackCtx, CurrentExecCtx, ExecCtx, ExecCtxFlags, run_later};
pub use time::{Timestamp, TimeSource};
pub use utils::{EternalSingleton, NoDestruct};
