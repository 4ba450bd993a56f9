//! Layered configuration for the tributary query service.
//!
//! Values resolve from built-in defaults, an optional configuration file
//! (`--config-path` / `TRIBUTARY_CONFIG_PATH`), `TRIBUTARY_*` environment
//! variables, and command-line flags, in increasing order of precedence.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_REQUEST_BYTES, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_SERVICERS,
    DEFAULT_SHUTDOWN_GRACE_MS, default_buffer_capacity, default_flush_interval_ms,
    default_listen_endpoint, default_log_filter, default_log_filter_string, default_log_format,
    default_max_request_bytes, default_queue_capacity, default_servicers,
    default_shutdown_grace_ms,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Runtime configuration shared by the daemon and its tests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TRIBUTARY")]
pub struct Config {
    /// Endpoint the HTTP listener binds.
    #[serde(default = "default_listen_endpoint")]
    pub listen: SocketEndpoint,
    /// `tracing` filter directive.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Flush threshold of the response buffer, in bytes.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Time-based flush threshold, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Workers serving the unbounded-consistency admission queue.
    #[serde(default = "default_servicers")]
    pub servicers: usize,
    /// Workers serving the plus-consistency and transactional queue.
    #[serde(default = "default_servicers")]
    pub plus_servicers: usize,
    /// Backlog of each admission queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Server-side timeout for requests that set none; zero disables it.
    #[serde(default)]
    pub request_timeout_ms: u64,
    /// Largest accepted request body.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// How long shutdown waits for active requests to finish.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Emit the `metrics` object when a request leaves the toggle unset.
    #[serde(default = "defaults::default_true")]
    pub metrics: bool,
    /// Emit the `signature` field when a request leaves the toggle unset.
    #[serde(default = "defaults::default_true")]
    pub signature: bool,
    /// Pretty-print responses when a request leaves the toggle unset.
    #[serde(default)]
    pub pretty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            servicers: DEFAULT_SERVICERS,
            plus_servicers: DEFAULT_SERVICERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_ms: 0,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            metrics: true,
            signature: true,
            pretty: false,
        }
    }
}

impl Config {
    /// Endpoint the HTTP listener binds.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// `tracing` filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Time-based flush threshold.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Server-side default timeout, or `None` when disabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }

    /// Drain window granted to active requests on shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
