//! Execution context subsystem modules.

pub mod callback_ctx;
pub(crate) mod context;
pub mod exec_ctx;
pub(crate) mod queue;

pub use callback_ctx::ApplicationCallbackCtx;
pub use exec_ctx::{CurrentExecCtx, ExecCtx, ExecCtxFlags, run_later};
pub use queue::Work;
