//! Process configuration read from the environment.

use crate::error::ConfigError;

use std::ffi::OsString;

/// Environment variable switching fork support on.
pub const ENABLE_FORK_SUPPORT_ENV: &str = "EXEC_CTX_ENABLE_FORK_SUPPORT";

/// Settings applied by [`Fork::global_init`](crate::Fork::global_init).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Whether execution contexts are counted by the fork barrier.
    pub fork_support: bool,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Reads the configuration through `lookup`. Unset variables keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENABLE_FORK_SUPPORT_ENV) {
            config.fork_support = parse_bool(ENABLE_FORK_SUPPORT_ENV, raw)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &'static str, raw: OsString) -> Result<bool, ConfigError> {
    let value = raw
        .into_string()
        .map_err(|_| ConfigError::NotUnicode { key })?;

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}
