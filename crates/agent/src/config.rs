//! Agent configuration loaded from the environment.

use std::time::Duration;

use printlink_core::error::CoreError;
use printlink_core::protocol::{socket_url, validate_base_url};
use printlink_core::timing::{
    DEFAULT_BROADCAST_INTERVAL_MS, DEFAULT_DEBOUNCE_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_RETRY_DELAY_MS,
};

/// Content type handed to the device when `PRINT_CONTENT_TYPE` is unset.
pub const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

/// Independently tunable delays used by the agent.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Re-fetch delay after a bad HTTP status and re-submit delay after a
    /// device failure.
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub broadcast_interval: Duration,
    /// Same-state coalescing window.
    pub debounce: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            broadcast_interval: Duration::from_millis(DEFAULT_BROADCAST_INTERVAL_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Control plane base URL, e.g. `http://127.0.0.1:3000/aaa`.
    pub base_url: String,
    /// Bearer credential for payload requests and the socket handshake.
    pub token: String,
    /// CUPS destination; empty selects the system default.
    pub printer_name: String,
    pub content_type: String,
    pub timings: Timings,
}

impl AgentConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default           |
    /// |-------------------------|-------------------|
    /// | `PRINTLINK_BASE_URL`    | required          |
    /// | `PRINTLINK_TOKEN`       | required          |
    /// | `PRINTER_NAME`          | `""`              |
    /// | `PRINT_CONTENT_TYPE`    | `application/pdf` |
    /// | `RETRY_DELAY_MS`        | `1000`            |
    /// | `POLL_INTERVAL_MS`      | `1000`            |
    /// | `RECONNECT_DELAY_MS`    | `1000`            |
    /// | `BROADCAST_INTERVAL_MS` | `1000`            |
    /// | `DEBOUNCE_MS`           | `5000`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("PRINTLINK_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("PRINTLINK_BASE_URL"))?;
        validate_base_url(&base_url)?;

        let token = lookup("PRINTLINK_TOKEN")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("PRINTLINK_TOKEN"))?;

        let printer_name = lookup("PRINTER_NAME").unwrap_or_default();
        let content_type =
            lookup("PRINT_CONTENT_TYPE").unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let millis = |var: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match lookup(var) {
                None => Ok(Duration::from_millis(default)),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidNumber { var, value }),
            }
        };

        let timings = Timings {
            retry_delay: millis("RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?,
            poll_interval: millis("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            reconnect_delay: millis("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?,
            broadcast_interval: millis("BROADCAST_INTERVAL_MS", DEFAULT_BROADCAST_INTERVAL_MS)?,
            debounce: millis("DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?,
        };

        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token,
            printer_name,
            content_type,
            timings,
        })
    }

    /// WebSocket endpoint of the control plane.
    pub fn socket_url(&self) -> String {
        socket_url(&self.base_url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} must be a whole number of milliseconds, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error(transparent)]
    InvalidUrl(#[from] CoreError),
}
