//! Fluent builder for process-wide initialization.
//!
//! Layers explicit settings over the environment, then applies them to the
//! fork subsystem.

use crate::config::Config;
use crate::error::{ConfigError, InitError};
use crate::fork::{ChildPostforkFn, Fork};

/// Builder for the process-wide configuration.
///
/// # Example
/// ```ignore
/// let config = Builder::new()
///     .enable_fork_support(true)
///     .reset_child_polling_engine(reset_poller)
///     .init()?;
/// ```
pub struct Builder {
    fork_support: Option<bool>,
    reset_child_polling_engine: Option<ChildPostforkFn>,
    install_atfork: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder that takes every setting from the environment.
    pub fn new() -> Self {
        Self {
            fork_support: None,
            reset_child_polling_engine: None,
            install_atfork: false,
        }
    }

    /// Overrides the environment's fork support setting.
    pub fn enable_fork_support(mut self, enable: bool) -> Self {
        self.fork_support = Some(enable);
        self
    }

    /// Sets the hook run in the child after a fork.
    pub fn reset_child_polling_engine(mut self, hook: ChildPostforkFn) -> Self {
        self.reset_child_polling_engine = Some(hook);
        self
    }

    /// Registers `pthread_atfork` handlers during [`init`](Builder::init).
    pub fn install_atfork_handlers(mut self) -> Self {
        self.install_atfork = true;
        self
    }

    /// Resolves the configuration without applying it.
    pub fn build(&self) -> Result<Config, ConfigError> {
        let mut config = Config::from_env()?;

        if let Some(enable) = self.fork_support {
            config.fork_support = enable;
        }

        Ok(config)
    }

    /// Resolves the configuration and applies it to the process.
    pub fn init(self) -> Result<Config, InitError> {
        let config = self.build()?;

        if let Some(hook) = self.reset_child_polling_engine {
            Fork::set_reset_child_polling_engine_func(hook);
        }

        Fork::global_init(&config);

        #[cfg(unix)]
        if self.install_atfork {
            crate::fork::atfork::install().map_err(InitError::AtFork)?;
        }

        Ok(config)
    }
}
